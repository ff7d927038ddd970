//! Atomic, mode-preserving file writes (spec.md: "all file writes preserve
//! the original mode bits"). Grounded on the pack's `PermissionsExt`
//! pattern for reading/restoring Unix mode bits (`astrid-core::dirs`,
//! `astralis-gateway::state`).

use std::path::Path;

use crate::error::ImporterError;

/// Reads a file's current mode bits, if the file exists and the platform
/// supports it. Returns `None` on non-Unix or if the file doesn't exist yet.
pub fn existing_mode(path: &Path) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).ok().map(|m| m.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

/// Writes `contents` to `path` via write-temp-then-rename, so a crash
/// mid-write never leaves a half-written file. Applies `mode`, if given.
pub fn atomic_write(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), ImporterError> {
    let tmp_path = sibling_tmp_path(path);

    std::fs::write(&tmp_path, contents).map_err(|source| ImporterError::Write { path: tmp_path.clone(), source })?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))
            .map_err(|source| ImporterError::Write { path: tmp_path.clone(), source })?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    std::fs::rename(&tmp_path, path).map_err(|source| ImporterError::Write { path: path.to_path_buf(), source })?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".subluminal.tmp");
    path.with_file_name(name)
}

/// Path of the single backup file for `config_path`.
pub fn backup_path(config_path: &Path) -> std::path::PathBuf {
    let mut name = config_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".subluminal.bak");
    config_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_file_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        atomic_write(&path, b"{\"a\":1}", None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");
    }

    #[cfg(unix)]
    #[test]
    fn atomic_write_preserves_requested_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        atomic_write(&path, b"{}", Some(0o640)).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn backup_path_appends_suffix() {
        let path = Path::new("/home/user/.config/claude/config.json");
        assert_eq!(backup_path(path), Path::new("/home/user/.config/claude/config.json.subluminal.bak"));
    }
}
