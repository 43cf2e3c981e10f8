//! Authenticated encryption of persisted payloads
//!
//! AES-256-GCM with a 16-byte random IV per call. The tag is carried
//! separately from the ciphertext; every field is hex on the wire.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::error::SecurityError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

type Cipher = AesGcm<Aes256, U16>;

/// One encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    pub iv: String,
    pub content: String,
    pub auth_tag: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Encrypt UTF-8 `plaintext` under `key` with a fresh IV
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &str) -> Result<EncryptedBlob, SecurityError> {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Cipher::new_from_slice(key)
        .map_err(|_| SecurityError::Encryption("invalid key length".into()))?;

    let sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_bytes())
        .map_err(|_| SecurityError::Encryption("cipher failure".into()))?;

    // GCM appends the 16-byte tag to the ciphertext
    if sealed.len() < TAG_LEN {
        return Err(SecurityError::Encryption("ciphertext shorter than tag".into()));
    }
    let (content, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    Ok(EncryptedBlob {
        iv: hex::encode(iv),
        content: hex::encode(content),
        auth_tag: hex::encode(tag),
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// Authenticate and decrypt `blob`. Any malformed or tampered field fails
/// with no plaintext returned.
pub fn decrypt(key: &[u8; KEY_LEN], blob: &EncryptedBlob) -> Result<String, SecurityError> {
    let iv = hex::decode(&blob.iv).map_err(|_| SecurityError::Decryption)?;
    let content = hex::decode(&blob.content).map_err(|_| SecurityError::Decryption)?;
    let tag = hex::decode(&blob.auth_tag).map_err(|_| SecurityError::Decryption)?;

    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(SecurityError::Decryption);
    }

    let cipher = Cipher::new_from_slice(key).map_err(|_| SecurityError::Decryption)?;

    let mut sealed = content;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_ref())
        .map_err(|_| SecurityError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| SecurityError::Decryption)
}
