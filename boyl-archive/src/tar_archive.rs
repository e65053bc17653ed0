use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use flate2::read::GzDecoder;
use tar::EntryType;
use tokio_util::sync::CancellationToken;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

use crate::error::ArchiveError;
use crate::util::{create_dir_all, safe_join, write_entry, ReadCounter};
use crate::Extractor;

/// Compression layer wrapped around a tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Zstd,
    Xz,
    Lzma,
}

/// Tar extractor over any [`Codec`].
///
/// Progress is the number of bytes pulled from the archive file, counted
/// beneath the decompressor, so it is always relative to
/// [`Extractor::progress_size`] (the on-disk size).
pub struct TarExtractor {
    path: PathBuf,
    codec: Codec,
}

impl TarExtractor {
    pub fn new(path: &Path, codec: Codec) -> Self {
        Self {
            path: path.to_path_buf(),
            codec,
        }
    }

    fn decoder(&self, counter: ReadCounter<File>) -> Result<Box<dyn Read>, ArchiveError> {
        Ok(match self.codec {
            Codec::None => Box::new(BufReader::new(counter)),
            Codec::Gzip => Box::new(GzDecoder::new(counter)),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(counter)?),
            Codec::Xz => Box::new(XzDecoder::new(counter)),
            Codec::Lzma => {
                let stream = Stream::new_lzma_decoder(u64::MAX).map_err(ArchiveError::decode)?;
                Box::new(XzDecoder::new_stream(counter, stream))
            }
        })
    }
}

impl Extractor for TarExtractor {
    fn progress_size(&self) -> Result<u64, ArchiveError> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn extract(
        &self,
        base: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(), ArchiveError> {
        let size = self.progress_size()?;
        if size == 0 {
            return Err(ArchiveError::decode(format!(
                "empty archive: {}",
                self.path.display()
            )));
        }

        let counter = ReadCounter::new(File::open(&self.path)?);
        let read = counter.handle();
        let report = || progress(read.load(Ordering::Relaxed).min(size));
        let on_chunk: &dyn Fn(u64) = &|_| report();

        let mut archive = tar::Archive::new(self.decoder(counter)?);
        for entry in archive.entries()? {
            if cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }
            let mut entry = entry?;
            let name = entry.path()?.into_owned();
            let dest = safe_join(base, &name)?;
            match entry.header().entry_type() {
                EntryType::Directory => create_dir_all(&dest)?,
                EntryType::Regular | EntryType::Continuous => {
                    let mode = entry.header().mode().ok();
                    write_entry(cancel, &dest, &mut entry, mode, Some(on_chunk))?;
                }
                other => {
                    log::debug!("Skipping tar entry {} of type {:?}", name.display(), other);
                }
            }
            report();
        }
        Ok(())
    }
}
