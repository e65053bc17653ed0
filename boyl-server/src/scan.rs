//! Catalog scanner.
//!
//! A scan walks the games directory, classifies every archive by its file
//! name and the metadata provider chain, then writes the results to the
//! catalog. Progress is mirrored on a status record for observers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use boyl_db::{
    Db, GameRecord, GameStatus, ScanStatus, delete_status, find_game_by_path, list_games,
    save_game, save_status, set_game_status, set_status_current,
};
use boyl_metadata::{MetadataGame, MetadataProvider, find_first};
use chrono::SecondsFormat;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::error::ScanError;
use crate::filename::{FilenameMetadata, parse_filename};
use crate::media::{MediaSource, store_media};

/// Id of the status record a running scan maintains.
pub const STATUS_ID: &str = "status1scanning";
const STATUS_NAME: &str = "Scanning in progress";

/// Archive suffixes the scanner picks up.
pub const ARCHIVE_SUFFIXES: &[&str] = &[".zip", ".tar.gz", ".tar.zst", ".7z", ".rar"];

pub fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// An archive a provider recognised.
#[derive(Debug, Clone)]
pub struct Match {
    pub path: String,
    pub filename: FilenameMetadata,
    pub game: MetadataGame,
}

/// An archive with a valid name that no provider knows.
#[derive(Debug, Clone)]
pub struct Missing {
    pub path: String,
    pub filename: FilenameMetadata,
}

/// Every archive visited by a scan, in walk order within each class.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub invalid: Vec<String>,
    pub missing: Vec<Missing>,
    pub matches: Vec<Match>,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.invalid.len() + self.missing.len() + self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps the catalog in sync with the games directory.
pub struct Scanner {
    games_directory: PathBuf,
    media_directory: PathBuf,
    providers: Vec<Box<dyn MetadataProvider>>,
    media: Box<dyn MediaSource>,
    db: Db,
}

/// Set while any scanner in the process is running.
static SCANNING: AtomicBool = AtomicBool::new(false);

/// Clears the single-flight flag when a scan ends, however it ends.
struct ScanningGuard;

impl Drop for ScanningGuard {
    fn drop(&mut self) {
        SCANNING.store(false, Ordering::SeqCst);
    }
}

impl Scanner {
    pub fn new(
        games_directory: PathBuf,
        media_directory: PathBuf,
        providers: Vec<Box<dyn MetadataProvider>>,
        media: Box<dyn MediaSource>,
        db: Db,
    ) -> Self {
        Self {
            games_directory,
            media_directory,
            providers,
            media,
            db,
        }
    }

    pub fn is_scanning(&self) -> bool {
        SCANNING.load(Ordering::SeqCst)
    }

    /// Scan the games directory and apply the result to the catalog.
    ///
    /// Only one scan runs at a time in the process, whichever scanner
    /// starts it; a concurrent call returns
    /// [`ScanError::AlreadyRunning`] without touching anything.
    pub async fn update(&self) -> Result<ScanResult, ScanError> {
        if SCANNING
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::AlreadyRunning);
        }
        let _guard = ScanningGuard;

        let mut status = ScanStatus {
            id: STATUS_ID.to_string(),
            name: STATUS_NAME.to_string(),
            text: "Preparing to scan".to_string(),
            total: 0,
            current: 0,
        };
        save_status(&self.db.lock(), &status)?;

        let result = self.run(&mut status).await;
        if let Err(e) = delete_status(&self.db.lock(), STATUS_ID) {
            log::warn!("Failed to remove scan status: {e}");
        }
        match &result {
            Ok(r) => log::info!(
                "Scan finished: {} found, {} missing, {} invalid",
                r.matches.len(),
                r.missing.len(),
                r.invalid.len()
            ),
            Err(e) => log::error!("Scan failed: {e}"),
        }
        result
    }

    async fn run(&self, status: &mut ScanStatus) -> Result<ScanResult, ScanError> {
        let skip = self.mark_deleted()?;
        let archives = find_archives(&self.games_directory, &skip)?;

        status.text = "Scanning".to_string();
        status.total = archives.len() as u64;
        save_status(&self.db.lock(), status)?;

        let (tx, rx) = mpsc::channel(16);
        let telemetry = tokio::spawn(track_progress(self.db.clone(), rx));
        let result = self.classify(archives, &tx).await;
        drop(tx);
        if let Err(e) = telemetry.await {
            log::warn!("Scan progress task failed: {e}");
        }
        let result = result?;

        status.text = "Applying changes to database".to_string();
        status.current = 0;
        save_status(&self.db.lock(), status)?;

        self.reconcile(&result).await?;
        Ok(result)
    }

    /// Mark catalog entries whose archive is gone as deleted, and return the
    /// paths of entries already found, which the walk skips.
    fn mark_deleted(&self) -> Result<HashSet<String>, ScanError> {
        let conn = self.db.lock();
        let mut skip = HashSet::new();
        for mut game in list_games(&conn)? {
            if !Path::new(&game.path).exists() && game.status != GameStatus::Deleted {
                log::error!("File for game not found: path={} name={}", game.path, game.name);
                set_game_status(&conn, &game.path, GameStatus::Deleted)?;
                game.status = GameStatus::Deleted;
            }
            if game.status == GameStatus::Found {
                skip.insert(game.path);
            }
        }
        Ok(skip)
    }

    async fn classify(
        &self,
        archives: Vec<String>,
        progress: &mpsc::Sender<u64>,
    ) -> Result<ScanResult, ScanError> {
        let mut result = ScanResult::default();
        for path in archives {
            match parse_filename(&path) {
                Err(e) => {
                    log::debug!("{e}");
                    result.invalid.push(path);
                }
                Ok(filename) => match find_first(&self.providers, &filename.name, filename.year).await? {
                    Some(game) => result.matches.push(Match {
                        path,
                        filename,
                        game,
                    }),
                    None => {
                        log::info!("No metadata for '{}' ({})", filename.name, filename.year);
                        result.missing.push(Missing { path, filename });
                    }
                },
            }
            // The receiver only goes away if the telemetry task died.
            let _ = progress.send(result.len() as u64).await;
        }
        Ok(result)
    }

    async fn reconcile(&self, result: &ScanResult) -> Result<(), ScanError> {
        let mut current = 0u64;

        for m in &result.matches {
            let mut record = self.existing_or_new(&m.path, GameStatus::Found)?;
            let media = store_media(
                self.media.as_ref(),
                &self.media_directory.join(&record.id),
                &m.game,
            )
            .await?;

            record.status = GameStatus::Found;
            record.name = m.game.name.clone();
            record.summary = m.game.summary.clone();
            record.released = Some(m.game.release_date.to_rfc3339_opts(SecondsFormat::Secs, true));
            record.rating = m.game.rating;
            record.genres = m.game.genres.clone();
            record.version = m.filename.version.clone();
            record.provider = m.game.provider.clone();
            record.provider_id = m.game.provider_id.clone();
            record.cover = media.cover;
            record.artworks = media.artworks;
            record.screenshots = media.screenshots;
            current = self.save(&mut record, current)?;
        }

        for m in &result.missing {
            let mut record = self.existing_or_new(&m.path, GameStatus::Missing)?;
            record.status = GameStatus::Missing;
            record.name = m.filename.name.clone();
            record.version = m.filename.version.clone();
            current = self.save(&mut record, current)?;
        }

        for path in &result.invalid {
            let mut record = self.existing_or_new(path, GameStatus::Invalid)?;
            record.status = GameStatus::Invalid;
            record.name = path.clone();
            current = self.save(&mut record, current)?;
        }
        Ok(())
    }

    fn existing_or_new(&self, path: &str, status: GameStatus) -> Result<GameRecord, ScanError> {
        Ok(find_game_by_path(&self.db.lock(), path)?.unwrap_or_else(|| GameRecord::new(path, status)))
    }

    fn save(&self, record: &mut GameRecord, current: u64) -> Result<u64, ScanError> {
        let conn = self.db.lock();
        save_game(&conn, record)?;
        set_status_current(&conn, STATUS_ID, current + 1)?;
        Ok(current + 1)
    }
}

/// Every archive under `root` not in `skip`, in file name order.
pub fn find_archives(root: &Path, skip: &HashSet<String>) -> Result<Vec<String>, ScanError> {
    let mut archives = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_archive(entry.path()) {
            continue;
        }
        let path = entry.path().to_string_lossy().into_owned();
        if !skip.contains(&path) {
            archives.push(path);
        }
    }
    Ok(archives)
}

async fn track_progress(db: Db, mut progress: mpsc::Receiver<u64>) {
    while let Some(current) = progress.recv().await {
        if let Err(e) = set_status_current(&db.lock(), STATUS_ID, current) {
            log::warn!("Failed to record scan progress: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_suffixes() {
        for name in ["a.zip", "b.tar.gz", "c.tar.zst", "d.7z", "e.RAR"] {
            assert!(is_archive(Path::new(name)), "{name}");
        }
        for name in ["a.gz", "b.tar", "c.iso", "readme.txt", "zip"] {
            assert!(!is_archive(Path::new(name)), "{name}");
        }
    }
}
