use std::cell::Cell;
use std::path::{Path, PathBuf};

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader};
use tokio_util::sync::CancellationToken;

use crate::error::ArchiveError;
use crate::util::{create_dir_all, safe_join, write_entry};
use crate::Extractor;

/// Windows attribute flag marking the high 16 bits as a unix mode.
const UNIX_EXTENSION: u32 = 0x8000;

/// 7z extractor. Solid blocks force sequential decoding, so entries are
/// processed in archive order.
pub struct SevenZipExtractor {
    path: PathBuf,
}

impl SevenZipExtractor {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn open(&self) -> Result<SevenZReader<std::fs::File>, ArchiveError> {
        SevenZReader::open(&self.path, Password::empty()).map_err(ArchiveError::decode)
    }
}

fn unix_mode(entry: &SevenZArchiveEntry) -> Option<u32> {
    if entry.has_windows_attributes && entry.windows_attributes & UNIX_EXTENSION != 0 {
        Some(entry.windows_attributes >> 16)
    } else {
        None
    }
}

impl Extractor for SevenZipExtractor {
    fn progress_size(&self) -> Result<u64, ArchiveError> {
        let reader = self.open()?;
        Ok(reader.archive().files.iter().map(|f| f.size).sum())
    }

    fn extract(
        &self,
        base: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(), ArchiveError> {
        let mut reader = self.open()?;
        let written = Cell::new(0u64);
        let advance: &dyn Fn(u64) = &|n| {
            written.set(written.get() + n);
            progress(written.get());
        };

        let mut failure: Option<ArchiveError> = None;
        let result = reader.for_each_entries(|entry, data| {
            if cancel.is_cancelled() {
                failure = Some(ArchiveError::Cancelled);
                return Ok(false);
            }
            let outcome = safe_join(base, Path::new(entry.name())).and_then(|dest| {
                if entry.is_directory() {
                    create_dir_all(&dest)?;
                    Ok(())
                } else {
                    write_entry(cancel, &dest, data, unix_mode(entry), Some(advance)).map(|_| ())
                }
            });
            match outcome {
                Ok(()) => Ok(true),
                Err(e) => {
                    failure = Some(e);
                    Ok(false)
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        result.map_err(ArchiveError::decode)
    }
}
