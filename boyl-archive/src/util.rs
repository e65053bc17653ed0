//! Shared helpers for the format extractors: path containment, the
//! cancellable bounded copy loop, and the read counter used to measure
//! progress over compressed input.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::error::ArchiveError;

/// Buffer size used by [`copy_with_progress`] when the caller supplies none.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns true if `target` lies inside `base`.
///
/// The relative path from `base` to `target` must exist, must not be
/// absolute, and must not start with `..`. Both paths are normalized
/// lexically first, so `base/a/../b` counts as inside while `base/../x`
/// does not.
pub fn is_within_base(base: &Path, target: &Path) -> bool {
    let base = normalize(base);
    let target = normalize(target);
    match pathdiff::diff_paths(&target, &base) {
        Some(rel) => {
            !rel.is_absolute() && !matches!(rel.components().next(), Some(Component::ParentDir))
        }
        None => false,
    }
}

/// Join an archive entry name onto `base`, rejecting names that escape it.
///
/// Absolute entry names are rejected outright rather than being re-rooted.
pub fn safe_join(base: &Path, entry: &Path) -> Result<PathBuf, ArchiveError> {
    if entry.has_root() || entry.is_absolute() {
        return Err(ArchiveError::IllegalPath(entry.to_path_buf()));
    }
    let target = normalize(&base.join(entry));
    if !is_within_base(base, &target) {
        return Err(ArchiveError::IllegalPath(entry.to_path_buf()));
    }
    Ok(target)
}

/// A reader that counts every byte pulled through it.
///
/// The running total is shared through an atomic handle so that the count
/// stays observable after the reader has been moved into a decoder.
pub struct ReadCounter<R> {
    inner: R,
    total: Arc<AtomicU64>,
}

impl<R: Read> ReadCounter<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle to the running byte count.
    pub fn handle(&self) -> Arc<AtomicU64> {
        self.total.clone()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl<R: Read> Read for ReadCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.total.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Copy `src` into `dst`, polling `cancel` between chunks.
///
/// `progress` receives the number of bytes written by each iteration. When
/// no callback is needed the copy is delegated to [`io::copy`], which can
/// take platform fast paths but is not cancellable mid-entry.
pub fn copy_with_progress<W, R>(
    cancel: &CancellationToken,
    dst: &mut W,
    src: &mut R,
    buf: Option<&mut [u8]>,
    progress: Option<&dyn Fn(u64)>,
) -> Result<u64, ArchiveError>
where
    W: Write + ?Sized,
    R: Read + ?Sized,
{
    let Some(progress) = progress else {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        return Ok(io::copy(src, dst)?);
    };

    let mut owned: Vec<u8>;
    let buf = match buf {
        Some(b) if !b.is_empty() => b,
        _ => {
            owned = vec![0u8; DEFAULT_BUFFER_SIZE];
            &mut owned[..]
        }
    };

    let mut written: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let nr = match src.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let nw = dst.write(&buf[..nr])?;
        written += nw as u64;
        progress(nw as u64);
        if nw != nr {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
    }
    Ok(written)
}

/// Create a directory and its parents with mode `0755`.
pub(crate) fn create_dir_all(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)
    }
}

/// Open `path` for writing (create + truncate), applying `mode` where the
/// platform supports it.
pub(crate) fn create_file(path: &Path, mode: Option<u32>) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode.map(|m| m & 0o7777).filter(|m| *m != 0).unwrap_or(0o644));
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Write one regular-file entry to `dest`, creating missing parents.
pub(crate) fn write_entry<R: Read + ?Sized>(
    cancel: &CancellationToken,
    dest: &Path,
    src: &mut R,
    mode: Option<u32>,
    progress: Option<&dyn Fn(u64)>,
) -> Result<u64, ArchiveError> {
    if let Some(parent) = dest.parent() {
        create_dir_all(parent)?;
    }
    let mut dst = create_file(dest, mode)?;
    copy_with_progress(cancel, &mut dst, src, None, progress)
}

#[cfg(test)]
#[path = "tests/util_tests.rs"]
mod tests;
