//! Streaming archive extraction with byte-level progress and cooperative
//! cancellation.
//!
//! [`new_extractor`] picks an [`Extractor`] from the archive name; the
//! extractor reports its progress denominator through
//! [`Extractor::progress_size`] and writes every entry beneath a base
//! directory, refusing entries that would land outside it.

pub mod error;
pub mod rar;
pub mod sevenzip;
pub mod tar_archive;
pub mod util;
pub mod zip_archive;

use std::path::Path;

use tokio_util::sync::CancellationToken;

pub use error::ArchiveError;
pub use rar::RarExtractor;
pub use sevenzip::SevenZipExtractor;
pub use tar_archive::{Codec, TarExtractor};
pub use util::{copy_with_progress, is_within_base, safe_join, ReadCounter, DEFAULT_BUFFER_SIZE};
pub use zip_archive::ZipExtractor;

/// A format-specific archive extractor.
pub trait Extractor: Send {
    /// Denominator for progress, in bytes.
    ///
    /// Uncompressed payload size for zip and 7z; on-disk archive size for
    /// the streaming formats (tar over any codec, rar).
    fn progress_size(&self) -> Result<u64, ArchiveError>;

    /// Extract every entry beneath `base`.
    ///
    /// `progress` receives the absolute number of bytes processed so far,
    /// in the same unit as [`Extractor::progress_size`]. The first failing
    /// entry aborts extraction; anything already written stays on disk.
    fn extract(
        &self,
        base: &Path,
        cancel: &CancellationToken,
        progress: &(dyn Fn(u64) + Sync),
    ) -> Result<(), ArchiveError>;
}

/// Tar suffixes, checked before anything else so `.tar.gz` never matches
/// a shorter suffix.
const TAR_SUFFIXES: &[(&str, Codec)] = &[
    (".tar.gz", Codec::Gzip),
    (".tar.zst", Codec::Zstd),
    (".tar.xz", Codec::Xz),
    (".tar.lzma", Codec::Lzma),
    (".tar", Codec::None),
];

/// Build an extractor for `archive`, choosing the format from `name`.
///
/// `name` is usually the archive's original file name; the file on disk
/// may carry a temporary name with no useful extension.
pub fn new_extractor(name: &str, archive: &Path) -> Result<Box<dyn Extractor>, ArchiveError> {
    let lower = name.to_lowercase();
    if let Some((_, codec)) = TAR_SUFFIXES.iter().find(|(s, _)| lower.ends_with(s)) {
        return Ok(Box::new(TarExtractor::new(archive, *codec)));
    }
    if lower.ends_with(".zip") {
        Ok(Box::new(ZipExtractor::new(archive)))
    } else if lower.ends_with(".7z") {
        Ok(Box::new(SevenZipExtractor::new(archive)))
    } else if lower.ends_with(".rar") {
        Ok(Box::new(RarExtractor::new(archive)))
    } else {
        Err(ArchiveError::unsupported(name))
    }
}
