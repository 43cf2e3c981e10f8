//! Security Module
//!
//! Data key custody, AES-256-GCM encryption of persisted settings, and
//! password hashing.

mod crypto;
mod error;
mod manager;
mod password;

pub use crypto::EncryptedBlob;
pub use error::SecurityError;
pub use manager::{ClearResult, SecurityInfo, SecurityManager};
pub use password::{
    compute_hash, generate_random_string, hash_password, verify_password, HashAlgorithm,
    PasswordHash,
};
