use std::path::Path;

use walkdir::WalkDir;

/// Find the most likely launcher under an install directory.
///
/// A file qualifies when any execute bit is set or its name ends in
/// `.exe`. The deepest candidate wins, later entries winning ties. Returns
/// an empty string when nothing qualifies.
pub fn find_executable_path(directory: &Path) -> std::io::Result<String> {
    let mut best: Option<(usize, String)> = None;

    for entry in WalkDir::new(directory).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if !is_executable(&entry)? {
            continue;
        }
        let depth = entry.path().components().count();
        if best.as_ref().is_none_or(|(d, _)| depth >= *d) {
            best = Some((depth, entry.path().to_string_lossy().into_owned()));
        }
    }

    Ok(best.map(|(_, path)| path).unwrap_or_default())
}

fn is_executable(entry: &walkdir::DirEntry) -> std::io::Result<bool> {
    if entry.file_name().to_string_lossy().ends_with(".exe") {
        return Ok(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = entry.metadata()?.permissions().mode();
        Ok(mode & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        Ok(false)
    }
}
