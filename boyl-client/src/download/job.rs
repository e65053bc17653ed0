use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, sync_channel};
use std::thread;
use std::time::Duration;

use boyl_archive::{DEFAULT_BUFFER_SIZE, copy_with_progress, new_extractor};
use boyl_db::{Db, DownloadRecord, DownloadStatus};
use tokio_util::sync::CancellationToken;

use super::JobHandle;
use crate::error::DownloadError;
use crate::moving_average::MovingAverage;
use crate::remote::{Remote, RemoteGame};

/// Interval between telemetry writes.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);
/// Window of the speed average.
pub const SPEED_WINDOW: Duration = Duration::from_secs(5);
/// How often a download waiting on the network checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);
/// Chunks buffered between the body reader thread and the job.
const BODY_QUEUE: usize = 16;

/// One download, from HTTP fetch to installed files.
pub struct Job<'a> {
    db: &'a Db,
    remote: &'a dyn Remote,
    handle: Arc<JobHandle>,
    game: RemoteGame,
    base_directory: PathBuf,
    archive_path: PathBuf,
}

impl<'a> Job<'a> {
    /// Look up the game behind `handle`'s record and lay out its paths
    /// under `games_directory`.
    pub fn new(
        db: &'a Db,
        remote: &'a dyn Remote,
        games_directory: &Path,
        handle: Arc<JobHandle>,
    ) -> Result<Self, DownloadError> {
        let game_id = handle.snapshot().game;
        let game = remote.get_game(&game_id)?;
        let base_directory = games_directory.join(&game.name);
        let archive_path = base_directory.join(format!("{}.tmp", game.id));
        Ok(Self {
            db,
            remote,
            handle,
            game,
            base_directory,
            archive_path,
        })
    }

    pub fn game(&self) -> &RemoteGame {
        &self.game
    }

    /// Install root, `<games directory>/<game name>`.
    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Drive the record from its current status to a terminal one.
    ///
    /// Returns the terminal status. Records that are already `completed` or
    /// `failed` are left untouched. Any error is persisted on the record
    /// before it is returned.
    pub fn run(&self) -> Result<DownloadStatus, DownloadError> {
        loop {
            let status = self.handle.status();
            let step = match status {
                DownloadStatus::Starting => self.persist(|r| {
                    r.status = DownloadStatus::Downloading;
                    r.text.clear();
                    r.active = true;
                    reset_counters(r);
                }),
                DownloadStatus::Downloading => self.download().and_then(|()| {
                    self.persist(|r| {
                        r.status = DownloadStatus::Extracting;
                        reset_counters(r);
                    })
                }),
                DownloadStatus::Extracting => self.extract().and_then(|()| {
                    self.persist(|r| {
                        r.status = DownloadStatus::Completed;
                        r.progress = 1.0;
                        r.speed = 0.0;
                        r.active = false;
                    })
                }),
                DownloadStatus::Completed | DownloadStatus::Failed => return Ok(status),
            };

            if let Err(e) = step {
                log::error!("Download {} of '{}' failed: {e}", self.handle.id(), self.game.name);
                self.handle.fail(self.db, &e);
                return Err(e);
            }
        }
    }

    fn persist(&self, update: impl FnOnce(&mut DownloadRecord)) -> Result<(), DownloadError> {
        self.handle.persist(self.db, update)
    }

    /// Stream the archive to the temporary file.
    fn download(&self) -> Result<(), DownloadError> {
        log::info!("Downloading '{}' to {}", self.game.name, self.archive_path.display());
        let cancel = self.handle.cancel_token();
        let body = self.remote.download(&self.game.id, cancel)?;
        let total = body.total.unwrap_or(0);
        self.persist(|r| {
            r.total = total;
            r.active = true;
        })?;

        fs::create_dir_all(&self.base_directory)?;
        let mut file = File::create(&self.archive_path)?;
        let mut reader = DetachedBody::spawn(body.reader, cancel.clone())?;
        self.with_telemetry(total, |bytes| {
            let advance: &dyn Fn(u64) = &|n| {
                bytes.fetch_add(n, Ordering::Relaxed);
            };
            copy_with_progress(cancel, &mut file, &mut reader, None, Some(advance)).map_err(|e| {
                if cancel.is_cancelled() {
                    DownloadError::Cancelled
                } else {
                    e.into()
                }
            })?;
            file.flush()?;
            Ok(())
        })
    }

    /// Unpack the temporary file into the install root, then remove it.
    fn extract(&self) -> Result<(), DownloadError> {
        let name = Path::new(&self.game.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Extracting '{}' ({name})", self.game.name);

        let extractor = new_extractor(&name, &self.archive_path)?;
        let size = extractor.progress_size()?;
        self.persist(|r| {
            r.total = size;
            r.active = true;
        })?;

        self.with_telemetry(size, |bytes| {
            extractor.extract(&self.base_directory, self.handle.cancel_token(), &|n| {
                bytes.fetch_max(n, Ordering::Relaxed);
            })?;
            Ok(())
        })?;

        fs::remove_file(&self.archive_path)?;
        Ok(())
    }

    /// Run `work` while a ticker thread persists progress and speed.
    ///
    /// `work` publishes its byte count into the counter it is handed; the
    /// ticker samples it every [`TICK_INTERVAL`] and stops once `work`
    /// returns or the job is cancelled.
    fn with_telemetry(
        &self,
        denominator: u64,
        work: impl FnOnce(&AtomicU64) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        let bytes = AtomicU64::new(0);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            let counter = &bytes;
            s.spawn(move || self.tick(counter, denominator, done_rx));
            let result = work(&bytes);
            drop(done_tx);
            result
        })
    }

    fn tick(&self, bytes: &AtomicU64, denominator: u64, done: Receiver<()>) {
        let speed = MovingAverage::new(SPEED_WINDOW);
        let mut last = 0u64;

        loop {
            match done.recv_timeout(TICK_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }
            if self.handle.cancel_token().is_cancelled() {
                return;
            }

            let current = bytes.load(Ordering::Relaxed);
            speed.add(current.saturating_sub(last) as f64 / TICK_INTERVAL.as_secs_f64());
            last = current;

            let progress = fraction(current, denominator);
            let rate = speed.get();
            let result = self.persist(|r| {
                if progress > r.progress {
                    r.progress = progress;
                }
                r.speed = rate;
            });
            match result {
                Ok(()) => {}
                Err(DownloadError::Cancelled) => return,
                Err(e) => log::warn!("Failed to record progress of {}: {e}", self.handle.id()),
            }
        }
    }
}

/// A response body drained on its own thread.
///
/// The job reads chunks from a queue instead of the body itself, so a read
/// stuck in the network never holds the job past its cancellation. The
/// reader thread exits on its own once its body fails or the job hangs up.
struct DetachedBody {
    chunks: Receiver<io::Result<Vec<u8>>>,
    cancel: CancellationToken,
    chunk: Vec<u8>,
    pos: usize,
}

impl DetachedBody {
    fn spawn(mut body: Box<dyn Read + Send>, cancel: CancellationToken) -> io::Result<Self> {
        let (tx, rx) = sync_channel(BODY_QUEUE);
        thread::Builder::new()
            .name("boyl-body".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
                loop {
                    let chunk = match body.read(&mut buf) {
                        Ok(0) => return,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.send(chunk).is_err() || failed {
                        return;
                    }
                }
            })?;
        Ok(Self {
            chunks: rx,
            cancel,
            chunk: Vec::new(),
            pos: 0,
        })
    }
}

impl Read for DetachedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.chunks.recv_timeout(CANCEL_POLL) {
                Ok(chunk) => {
                    self.chunk = chunk?;
                    self.pos = 0;
                }
                Err(RecvTimeoutError::Timeout) if self.cancel.is_cancelled() => {
                    return Err(io::Error::other("download cancelled"));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn reset_counters(record: &mut DownloadRecord) {
    record.progress = 0.0;
    record.speed = 0.0;
    record.total = 0;
}

/// `done / total` clamped to `[0, 1]`; zero when the total is unknown.
fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done.min(total) as f64 / total as f64).clamp(0.0, 1.0)
}
