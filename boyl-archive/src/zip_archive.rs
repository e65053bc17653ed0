use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::error::ArchiveError;
use crate::util::{create_dir_all, safe_join, write_entry};
use crate::Extractor;

/// Zip extractor. Entries are extracted in parallel, each worker holding
/// its own handle on the archive file.
pub struct ZipExtractor {
    path: PathBuf,
}

impl ZipExtractor {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn open(&self) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
        let file = File::open(&self.path)?;
        Ok(ZipArchive::new(BufReader::new(file))?)
    }
}

/// State shared by the worker threads of one extraction.
struct Group<'a> {
    next: AtomicUsize,
    written: Mutex<u64>,
    first_error: Mutex<Option<ArchiveError>>,
    cancel: CancellationToken,
    progress: &'a (dyn Fn(u64) + Sync),
}

impl Group<'_> {
    fn fail(&self, err: ArchiveError) {
        {
            let mut slot = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }

    fn advance(&self, n: u64) {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        *written += n;
        (self.progress)(*written);
    }
}

fn extract_entry(
    archive: &mut ZipArchive<BufReader<File>>,
    index: usize,
    base: &Path,
    group: &Group<'_>,
) -> Result<(), ArchiveError> {
    let mut file = archive.by_index(index)?;
    let dest = safe_join(base, Path::new(file.name()))?;
    if file.is_dir() {
        create_dir_all(&dest)?;
        return Ok(());
    }
    let mode = file.unix_mode();
    let advance: &dyn Fn(u64) = &|n| group.advance(n);
    write_entry(&group.cancel, &dest, &mut file, mode, Some(advance))?;
    Ok(())
}

impl Extractor for ZipExtractor {
    fn progress_size(&self) -> Result<u64, ArchiveError> {
        let mut archive = self.open()?;
        let mut size = 0;
        for i in 0..archive.len() {
            size += archive.by_index_raw(i)?.size();
        }
        Ok(size)
    }

    fn extract(
        &self,
        base: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(), ArchiveError> {
        let len = self.open()?.len();
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(len)
            .max(1);
        log::debug!(
            "Extracting {} zip entries with {} workers from {}",
            len,
            workers,
            self.path.display()
        );

        let group = Group {
            next: AtomicUsize::new(0),
            written: Mutex::new(0),
            first_error: Mutex::new(None),
            cancel: cancel.child_token(),
            progress,
        };

        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    let mut archive = match self.open() {
                        Ok(a) => a,
                        Err(e) => return group.fail(e),
                    };
                    loop {
                        if group.cancel.is_cancelled() {
                            return;
                        }
                        let index = group.next.fetch_add(1, Ordering::Relaxed);
                        if index >= len {
                            return;
                        }
                        if let Err(e) = extract_entry(&mut archive, index, base, &group) {
                            return group.fail(e);
                        }
                    }
                });
            }
        });

        let first = group
            .first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        match first {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(ArchiveError::Cancelled),
            None => Ok(()),
        }
    }
}
