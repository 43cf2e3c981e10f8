//! Password hashing and one-shot digests

use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::error::SecurityError;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const HASH_LEN: usize = 64;
const SALT_LEN: usize = 16;

/// PBKDF2 output and the salt it was derived with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    /// Hex, 64 bytes
    pub hash: String,
    pub salt: String,
}

/// Derive a PBKDF2-HMAC-SHA512 hash of `password`.
///
/// The salt string's UTF-8 bytes feed the KDF; without one, a fresh salt is
/// the hex of 16 random bytes.
pub fn hash_password(password: &str, salt: Option<&str>) -> PasswordHash {
    let salt = match salt {
        Some(salt) => salt.to_string(),
        None => random_hex(SALT_LEN),
    };
    let derived = derive(password, &salt);
    PasswordHash {
        hash: hex::encode(&*derived),
        salt,
    }
}

/// Recompute with `salt` and compare to `hash` in constant time
pub fn verify_password(password: &str, hash: &str, salt: &str) -> bool {
    let expected = match hex::decode(hash) {
        Ok(bytes) if bytes.len() == HASH_LEN => bytes,
        _ => return false,
    };
    let derived = derive(password, salt);
    derived.as_slice().ct_eq(expected.as_slice()).into()
}

fn derive(password: &str, salt: &str) -> Zeroizing<[u8; HASH_LEN]> {
    let mut out = Zeroizing::new([0u8; HASH_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut *out,
    );
    out
}

/// Digest algorithms accepted by `compute_hash`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for HashAlgorithm {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(HashAlgorithm::Md5),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(SecurityError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Hex digest of `data`
pub fn compute_hash(data: &str, algorithm: HashAlgorithm) -> String {
    let bytes = data.as_bytes();
    match algorithm {
        HashAlgorithm::Md5 => hex::encode(md5::Md5::digest(bytes)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        HashAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    }
}

/// Random hex string of exactly `length` characters
pub fn generate_random_string(length: usize) -> String {
    let mut s = random_hex(length.div_ceil(2));
    s.truncate(length);
    s
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
