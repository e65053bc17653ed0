//! Client side of boyl: fetches games from a catalog server and installs
//! them locally.
//!
//! Downloads are persisted records driven by [`download::Manager`]; the
//! server is reached through the [`remote::Remote`] trait and settings live
//! in the same store as the downloads.

pub mod download;
pub mod error;
pub mod executable;
pub mod moving_average;
pub mod remote;
pub mod settings;

pub use download::{CancelOutcome, Job, JobHandle, Manager, queue};
pub use error::{DownloadError, RemoteError};
pub use executable::find_executable_path;
pub use moving_average::MovingAverage;
pub use remote::{Remote, RemoteClient, RemoteDownload, RemoteGame};
pub use settings::{SettingKey, Settings};
