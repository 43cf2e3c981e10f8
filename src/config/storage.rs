//! Configuration Storage
//!
//! Application data location and owner-only file primitives.
//! Location: %APPDATA%\ssh-tunnel-manager on Windows,
//! ~/Library/Application Support/ssh-tunnel-manager on macOS,
//! $XDG_CONFIG_HOME/ssh-tunnel-manager (or ~/.config/...) elsewhere.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "ssh-tunnel-manager";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine application data directory")]
    NoAppDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Get the application data directory
pub fn app_data_dir() -> Result<PathBuf, StorageError> {
    resolve_app_data_dir(dirs::config_dir(), dirs::home_dir()).ok_or(StorageError::NoAppDataDir)
}

/// The platform config dir, else `~/.config`
fn resolve_app_data_dir(config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    config_dir
        .or_else(|| home_dir.map(|home| home.join(".config")))
        .map(|dir| dir.join(APP_DIR_NAME))
}

/// Create `dir` (and parents) readable only by the owner
pub fn ensure_private_dir(dir: &Path) -> Result<(), StorageError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
        }
    }
    Ok(())
}

fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options
}

/// Write a new file with owner-only permissions; fails if `path` exists
pub fn write_private_exclusive(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut file = private_options().create_new(true).open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Replace `path` atomically: write a sibling temp file, then rename onto it
pub fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let temp_path = temp_path_for(path);

    let result = (|| -> Result<(), StorageError> {
        let mut file = private_options()
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Remove a file, treating "already gone" as success.
/// Returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_app_data_dir_falls_back_to_home() {
        let config = PathBuf::from("/cfg");
        let home = PathBuf::from("/home/ops");

        assert_eq!(
            resolve_app_data_dir(Some(config.clone()), Some(home.clone())),
            Some(config.join(APP_DIR_NAME))
        );
        assert_eq!(
            resolve_app_data_dir(None, Some(home.clone())),
            Some(home.join(".config").join(APP_DIR_NAME))
        );
        assert_eq!(resolve_app_data_dir(None, None), None);
    }

    #[test]
    fn test_atomic_write_replaces_and_cleans_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.encrypted");

        write_private_atomic(&path, b"first").unwrap();
        write_private_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!temp_path_for(&path).exists());
        assert_eq!(
            temp_path_for(&path).file_name().unwrap(),
            "config.encrypted.tmp"
        );
    }

    #[test]
    fn test_exclusive_write_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".encryption_key");

        write_private_exclusive(&path, b"abc").unwrap();
        let err = write_private_exclusive(&path, b"def").unwrap_err();
        match err {
            StorageError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let nested = dir.path().join("app");
        ensure_private_dir(&nested).unwrap();
        let path = nested.join("secret");
        write_private_atomic(&path, b"x").unwrap();

        let dir_mode = fs::metadata(&nested).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
    }
}
