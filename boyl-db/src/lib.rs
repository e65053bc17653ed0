//! SQLite record store shared by the client and the server.
//!
//! Provides schema creation, typed records, and CRUD operations backed by
//! SQLite (via rusqlite with the bundled feature). [`Db`] is the cloneable
//! handle threads and tasks share.

pub mod operations;
pub mod queries;
pub mod schema;
pub mod types;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;

pub use operations::{
    OperationError, deactivate_downloads, delete_download, delete_status, insert_download,
    reset_unfinished_downloads, save_download, save_game, save_status, set_game_status,
    set_setting, set_status_current, upsert_client_game,
};
pub use queries::{
    find_client_game_by_remote, find_download, find_game_by_path, find_status, get_setting,
    list_downloads, list_games,
};
pub use schema::{SchemaError, Side, open_database, open_memory_client, open_memory_server};
pub use types::*;

/// A shared connection.
///
/// Every access takes the lock for the duration of one operation; callers
/// must not hold the guard while waiting on anything else.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open (or create) the database file for `side`.
    pub fn open(path: &Path, side: Side) -> Result<Self, SchemaError> {
        Ok(Self::new(open_database(path, side)?))
    }

    pub fn memory_client() -> Result<Self, SchemaError> {
        Ok(Self::new(open_memory_client()?))
    }

    pub fn memory_server() -> Result<Self, SchemaError> {
        Ok(Self::new(open_memory_server()?))
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
