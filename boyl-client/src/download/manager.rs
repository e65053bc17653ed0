use std::collections::HashMap;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use boyl_db::{
    ClientGame, Db, DownloadRecord, DownloadStatus, deactivate_downloads, delete_download,
    find_client_game_by_remote, find_download, list_downloads, new_id,
    reset_unfinished_downloads, save_download, upsert_client_game,
};

use super::{Job, JobHandle};
use crate::error::DownloadError;
use crate::executable::find_executable_path;
use crate::remote::Remote;
use crate::settings::Settings;

/// What [`Manager::cancel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A running download was stopped and marked `failed`.
    Cancelled,
    /// A finished download was removed.
    Deleted,
}

/// Runs download jobs one at a time and tracks them by record id.
pub struct Manager {
    db: Db,
    remote: Arc<dyn Remote>,
    settings: Settings,
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
}

impl Manager {
    pub fn new(db: Db, remote: Arc<dyn Remote>, settings: Settings) -> Self {
        Self {
            db,
            remote,
            settings,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Run every queued record until the sending side closes.
    ///
    /// A failing record is logged and does not stop the worker.
    pub fn worker(&self, incoming: Receiver<DownloadRecord>) {
        for record in incoming {
            let id = record.id.clone();
            if let Err(e) = self.process(record) {
                log::error!("Download {id} did not complete: {e}");
            }
        }
        log::debug!("Download queue closed");
    }

    fn process(&self, record: DownloadRecord) -> Result<(), DownloadError> {
        let handle = Arc::new(JobHandle::new(record));
        self.jobs().insert(handle.id(), handle.clone());

        if handle.status() == DownloadStatus::Failed {
            log::debug!("Skipping failed download {}", handle.id());
            return Ok(());
        }

        let job = self
            .settings
            .games_directory()
            .and_then(|dir| Job::new(&self.db, self.remote.as_ref(), &dir, handle.clone()));
        let job = match job {
            Ok(job) => job,
            Err(e) => {
                if !handle.status().is_terminal() {
                    handle.fail(&self.db, &e);
                }
                return Err(e);
            }
        };

        if job.run()? == DownloadStatus::Completed {
            self.install(&job)?;
        }
        Ok(())
    }

    /// Record the installed game, discovering its launcher when the server
    /// did not name one.
    fn install(&self, job: &Job<'_>) -> Result<(), DownloadError> {
        let game = job.game();
        let executable = if game.executable.is_empty() {
            find_executable_path(job.base_directory())?
        } else {
            game.executable.clone()
        };

        let conn = self.db.lock();
        let id = find_client_game_by_remote(&conn, &game.id)?
            .map(|existing| existing.id)
            .unwrap_or_else(new_id);
        upsert_client_game(
            &conn,
            &ClientGame {
                id,
                game: game.id.clone(),
                path: job.base_directory().to_string_lossy().into_owned(),
                executable,
            },
        )?;
        log::info!("Installed '{}' in {}", game.name, job.base_directory().display());
        Ok(())
    }

    /// Cancel a running download, or delete a finished one.
    ///
    /// Downloads this manager is not tracking are resolved against the
    /// store: a terminal record is deleted, anything else is marked
    /// `failed` so the process running it stops at its next tick.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, DownloadError> {
        let tracked = self.jobs().get(id).cloned();

        if let Some(handle) = tracked {
            if handle.status().is_terminal() {
                self.jobs().remove(id);
                delete_download(&self.db.lock(), id)?;
                log::info!("Removed download {id}");
                return Ok(CancelOutcome::Deleted);
            }

            handle.cancel_token().cancel();
            match handle.persist(&self.db, |r| {
                r.status = DownloadStatus::Failed;
                r.active = false;
            }) {
                Ok(()) | Err(DownloadError::Cancelled) => {}
                Err(e) => return Err(e),
            }
            log::info!("Cancelled download {id}");
            return Ok(CancelOutcome::Cancelled);
        }

        let conn = self.db.lock();
        let mut record =
            find_download(&conn, id)?.ok_or_else(|| DownloadError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            delete_download(&conn, id)?;
            log::info!("Removed download {id}");
            return Ok(CancelOutcome::Deleted);
        }
        record.status = DownloadStatus::Failed;
        record.active = false;
        save_download(&conn, &mut record)?;
        log::info!("Cancelled download {id}");
        Ok(CancelOutcome::Cancelled)
    }

    /// Queue every persisted download, restarting unfinished ones.
    ///
    /// Returns the number of records queued. Blocks while the queue is
    /// full, so the worker must already be running.
    pub fn replay(&self, queue: &SyncSender<DownloadRecord>) -> Result<usize, DownloadError> {
        let records = {
            let conn = self.db.lock();
            let reset = reset_unfinished_downloads(&conn)?;
            if reset > 0 {
                log::info!("Restarting {reset} unfinished download(s)");
            }
            list_downloads(&conn)?
        };

        let count = records.len();
        for record in records {
            if queue.send(record).is_err() {
                log::warn!("Download queue closed during replay");
                break;
            }
        }
        Ok(count)
    }

    /// Clear the `active` flag on every download before exit.
    pub fn shutdown(&self) -> Result<usize, DownloadError> {
        Ok(deactivate_downloads(&self.db.lock())?)
    }

    /// The in-memory record of a tracked download. It may be ahead of the
    /// stored one while a write is pending.
    pub fn live(&self, id: &str) -> Option<DownloadRecord> {
        self.jobs().get(id).map(|handle| handle.snapshot())
    }

    /// Ids of the downloads this manager has seen.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.jobs().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<JobHandle>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
