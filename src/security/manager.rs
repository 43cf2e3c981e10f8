//! Security Manager
//!
//! Custody of the 256-bit data key and encrypted persistence of the
//! application config.
//!
//! Files in the application data directory:
//! - `.encryption_key`: 64 hex characters, owner-only
//! - `config.encrypted`: JSON `EncryptedBlob`, owner-only, replaced atomically

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::crypto::{self, EncryptedBlob, KEY_LEN};
use super::error::SecurityError;
use crate::config::storage::{
    ensure_private_dir, remove_if_exists, write_private_atomic, write_private_exclusive,
    StorageError,
};
use crate::config::{app_data_dir, PersistedAppConfig, CONFIG_VERSION};

const KEY_FILE: &str = ".encryption_key";
const CONFIG_FILE: &str = "config.encrypted";

type DataKey = Zeroizing<[u8; KEY_LEN]>;

struct KeyState {
    key: DataKey,
    /// False when the key only lives in memory for this process
    persistent: bool,
}

/// Outcome of `clear_all_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    pub success: bool,
    pub message: String,
}

/// What is stored on disk right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    pub has_stored_key: bool,
    pub has_stored_config: bool,
    /// Milliseconds since the config file was last written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_age: Option<u64>,
    pub key_is_persistent: bool,
}

pub struct SecurityManager {
    /// `None` when no application data location exists; nothing is persisted
    data_dir: Option<PathBuf>,
    key: RwLock<KeyState>,
}

impl SecurityManager {
    /// Manager rooted at the OS application data directory. Without one,
    /// the key lives in memory for this process only.
    pub fn new() -> Self {
        match app_data_dir() {
            Ok(dir) => Self::with_data_dir(dir),
            Err(e) => {
                warn!("{}; using an in-memory key for this session", e);
                Self::in_memory()
            }
        }
    }

    /// Manager rooted at `data_dir`; loads or creates the key immediately
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let state = load_or_create_key(&data_dir);
        Self {
            data_dir: Some(data_dir),
            key: RwLock::new(state),
        }
    }

    /// Manager with no backing directory
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            key: RwLock::new(ephemeral_key()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn key_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(KEY_FILE))
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn encrypt_data(&self, plaintext: &str) -> Result<EncryptedBlob, SecurityError> {
        let state = self.key.read();
        crypto::encrypt(&state.key, plaintext)
    }

    pub fn decrypt_data(&self, blob: &EncryptedBlob) -> Result<String, SecurityError> {
        let state = self.key.read();
        crypto::decrypt(&state.key, blob)
    }

    /// Stamp, encrypt and atomically persist `config`
    pub fn secure_store_config(&self, config: &PersistedAppConfig) -> Result<(), SecurityError> {
        let mut stamped = config.clone();
        stamped.last_used = Utc::now().timestamp_millis();
        stamped.version = CONFIG_VERSION.to_string();

        let plaintext = Zeroizing::new(serde_json::to_string(&stamped)?);
        let blob = self.encrypt_data(&plaintext)?;
        let serialized = serde_json::to_vec_pretty(&blob)?;

        let dir = self.data_dir.as_deref().ok_or(StorageError::NoAppDataDir)?;
        ensure_private_dir(dir)?;
        let path = dir.join(CONFIG_FILE);
        write_private_atomic(&path, &serialized)?;

        info!(
            "Saved encrypted config ({} jump hosts) to {:?}",
            stamped.jump_hosts.len(),
            path
        );
        Ok(())
    }

    /// Load the stored config. Missing, unreadable, tampered or malformed
    /// files all yield `None`.
    pub fn load_config(&self) -> Option<PersistedAppConfig> {
        let path = self.config_path()?;
        if !path.exists() {
            debug!("No stored config at {:?}", path);
            return None;
        }

        match self.read_config(&path) {
            Ok(config) => {
                info!("Loaded config with {} jump hosts", config.jump_hosts.len());
                Some(config)
            }
            Err(e) => {
                warn!("Ignoring stored config {:?}: {}", path, e);
                None
            }
        }
    }

    fn read_config(&self, path: &Path) -> Result<PersistedAppConfig, SecurityError> {
        let raw = std::fs::read(path)?;
        let blob: EncryptedBlob = serde_json::from_slice(&raw)?;
        let plaintext = Zeroizing::new(self.decrypt_data(&blob)?);
        serde_json::from_str(&plaintext).map_err(|e| SecurityError::ConfigValidation(e.to_string()))
    }

    /// Delete the stored config and key, then provision a new key.
    /// A file that cannot be removed is logged and reported in `message`;
    /// the remaining files are still removed.
    pub fn clear_all_data(&self) -> ClearResult {
        let mut failures = Vec::new();

        for path in [self.config_path(), self.key_path()].into_iter().flatten() {
            match remove_if_exists(&path) {
                Ok(true) => info!("Removed {:?}", path),
                Ok(false) => debug!("{:?} was already absent", path),
                Err(e) => {
                    warn!("Failed to remove {:?}: {}", path, e);
                    failures.push(path.display().to_string());
                }
            }
        }

        let state = match &self.data_dir {
            Some(dir) => load_or_create_key(dir),
            None => ephemeral_key(),
        };
        *self.key.write() = state;

        let message = if failures.is_empty() {
            "All stored data cleared and a new encryption key generated".to_string()
        } else {
            format!(
                "Stored data cleared and a new encryption key generated; could not remove {}",
                failures.join(", ")
            )
        };
        ClearResult {
            success: true,
            message,
        }
    }

    pub fn security_info(&self) -> SecurityInfo {
        let config_age = self
            .config_path()
            .and_then(|path| std::fs::metadata(path).and_then(|m| m.modified()).ok())
            .map(|modified| {
                SystemTime::now()
                    .duration_since(modified)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0)
            });

        SecurityInfo {
            has_stored_key: self.key_path().is_some_and(|path| path.exists()),
            has_stored_config: self.config_path().is_some_and(|path| path.exists()),
            config_age,
            key_is_persistent: self.key.read().persistent,
        }
    }
}

/// Read the key file, or generate and persist a new key. Falls back to an
/// in-memory key when the file cannot be written.
fn load_or_create_key(data_dir: &Path) -> KeyState {
    let path = data_dir.join(KEY_FILE);

    match read_key_file(&path) {
        Ok(Some(key)) => {
            debug!("Loaded encryption key from {:?}", path);
            return KeyState {
                key,
                persistent: true,
            };
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to read encryption key {:?}: {}", path, e),
    }

    let fresh = ephemeral_key();

    match persist_key(data_dir, &path, &fresh.key) {
        Ok(()) => {
            info!("Generated new encryption key at {:?}", path);
            KeyState {
                persistent: true,
                ..fresh
            }
        }
        Err(e) => {
            // A concurrent process may have created the file first; this
            // key then diverges from the one on disk.
            warn!(
                "Could not persist encryption key to {:?} ({}); using an in-memory key for this session",
                path, e
            );
            fresh
        }
    }
}

/// Random key that is not backed by a file
fn ephemeral_key() -> KeyState {
    let mut key: DataKey = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut *key);
    KeyState {
        key,
        persistent: false,
    }
}

/// `Ok(None)` when the file is missing or does not hold a valid key.
/// A corrupt file is removed so a fresh one can be created.
fn read_key_file(path: &Path) -> Result<Option<DataKey>, SecurityError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => Zeroizing::new(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let hex_key = contents.trim();
    let mut key: DataKey = Zeroizing::new([0u8; KEY_LEN]);
    if hex_key.len() == KEY_LEN * 2 && hex::decode_to_slice(hex_key, &mut *key).is_ok() {
        return Ok(Some(key));
    }

    warn!("Encryption key file {:?} is corrupt; regenerating", path);
    remove_if_exists(path)?;
    Ok(None)
}

fn persist_key(data_dir: &Path, path: &Path, key: &DataKey) -> Result<(), SecurityError> {
    ensure_private_dir(data_dir)?;
    let encoded = Zeroizing::new(hex::encode(&**key));
    write_private_exclusive(path, encoded.as_bytes())?;
    Ok(())
}
