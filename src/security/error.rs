//! Security error types

use thiserror::Error;

use crate::config::StorageError;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed (wrong key or corrupted data)")]
    Decryption,

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SecurityError {
    /// Stable error code for the command envelope
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::Encryption(_) => "EncryptionError",
            SecurityError::Decryption => "DecryptionError",
            SecurityError::ConfigValidation(_) => "ConfigValidationError",
            SecurityError::Storage(_) => "FileSystemError",
            SecurityError::UnsupportedAlgorithm(_) => "UnsupportedAlgorithm",
            SecurityError::Json(_) => "SerializationError",
        }
    }
}

impl From<std::io::Error> for SecurityError {
    fn from(e: std::io::Error) -> Self {
        SecurityError::Storage(StorageError::Io(e))
    }
}

impl serde::Serialize for SecurityError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
