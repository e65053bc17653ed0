//! Download jobs and the manager that runs them.
//!
//! A [`Manager`] drains a bounded queue of download records on a single
//! worker thread. Each record drives a [`Job`] through
//! `starting → downloading → extracting → completed`, persisting progress
//! and speed every 500 ms; any failure leaves the record `failed` with the
//! error text.

mod job;
mod manager;

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Mutex, MutexGuard, PoisonError};

use boyl_db::{Db, DownloadRecord, DownloadStatus, find_download, save_download};
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

pub use job::Job;
pub use manager::{CancelOutcome, Manager};

/// Capacity of the download queue.
pub const QUEUE_CAPACITY: usize = 20;

/// The bounded queue feeding [`Manager::worker`].
pub fn queue() -> (SyncSender<DownloadRecord>, Receiver<DownloadRecord>) {
    sync_channel(QUEUE_CAPACITY)
}

/// What the manager keeps for a job: its live record and its cancel signal.
pub struct JobHandle {
    record: Mutex<DownloadRecord>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn new(record: DownloadRecord) -> Self {
        Self {
            record: Mutex::new(record),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn status(&self) -> DownloadStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> DownloadRecord {
        self.lock().clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Apply `update` to the live record and write it to the store.
    ///
    /// A record that was deleted, or marked `failed` by someone else while
    /// this job still considers it running, is not written back; the job
    /// is cancelled instead.
    pub fn persist(
        &self,
        db: &Db,
        update: impl FnOnce(&mut DownloadRecord),
    ) -> Result<(), DownloadError> {
        let mut snapshot = {
            let mut record = self.lock();
            update(&mut record);
            record.clone()
        };

        let conn = db.lock();
        match find_download(&conn, &snapshot.id)? {
            None => {
                self.cancel.cancel();
                Err(DownloadError::Cancelled)
            }
            Some(stored)
                if stored.status == DownloadStatus::Failed
                    && snapshot.status != DownloadStatus::Failed =>
            {
                self.cancel.cancel();
                Err(DownloadError::Cancelled)
            }
            Some(_) => {
                save_download(&conn, &mut snapshot)?;
                Ok(())
            }
        }
    }

    /// Mark the record failed with `err` as its text.
    pub fn fail(&self, db: &Db, err: &DownloadError) {
        let text = err.to_string();
        let result = self.persist(db, |r| {
            r.status = DownloadStatus::Failed;
            r.text = text;
            r.active = false;
        });
        if let Err(e) = result {
            log::debug!("Could not record failure of download {}: {e}", self.id());
        }
    }

    fn lock(&self) -> MutexGuard<'_, DownloadRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
