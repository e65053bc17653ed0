use std::fs;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use unrar::Archive;

use crate::error::ArchiveError;
use crate::util::{create_dir_all, safe_join};
use crate::Extractor;

/// Rar extractor.
///
/// Progress is measured against the compressed archive size. The
/// decompressor writes each entry itself, so after every entry the
/// reported value is the share of unpacked bytes done scaled onto the
/// archive size.
pub struct RarExtractor {
    path: PathBuf,
}

impl RarExtractor {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn unpacked_total(&self) -> Result<u64, ArchiveError> {
        let listing = Archive::new(&self.path)
            .open_for_listing()
            .map_err(ArchiveError::decode)?;
        let mut total = 0u64;
        for header in listing {
            total += header.map_err(ArchiveError::decode)?.unpacked_size;
        }
        Ok(total)
    }
}

fn scaled(archive_size: u64, done: u64, total: u64) -> u64 {
    if total == 0 {
        return archive_size;
    }
    ((archive_size as u128 * done.min(total) as u128) / total as u128) as u64
}

impl Extractor for RarExtractor {
    fn progress_size(&self) -> Result<u64, ArchiveError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn extract(
        &self,
        base: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(), ArchiveError> {
        let archive_size = self.progress_size()?;
        let total = self.unpacked_total()?;
        let mut done = 0u64;

        let mut archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(ArchiveError::decode)?;
        while let Some(header) = archive.read_header().map_err(ArchiveError::decode)? {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let entry = header.entry();
            let dest = safe_join(base, &entry.filename)?;
            let size = entry.unpacked_size;
            archive = if entry.is_directory() {
                create_dir_all(&dest)?;
                header.skip().map_err(ArchiveError::decode)?
            } else {
                if let Some(parent) = dest.parent() {
                    create_dir_all(parent)?;
                }
                let next = header.extract_to(&dest).map_err(ArchiveError::decode)?;
                done += size;
                progress(scaled(archive_size, done, total));
                next
            };
        }
        progress(archive_size);
        Ok(())
    }
}
