//! Error types for keys and key managers

use thiserror::Error;

use crate::key::KeyId;

pub type KeyManagerResult<T> = Result<T, KeyManagerError>;

#[derive(Error, Debug)]
pub enum KeyManagerError {
    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    #[error("key storage error: {0}")]
    Storage(String),

    #[error("key record serialization error: {0}")]
    Serialization(String),

    #[error("key storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Captured failure of a key's encryptor factory.
///
/// Lives inside the key's memo cell, so it is clonable and carries the
/// rendered failure chain instead of the source error.
#[derive(Error, Debug, Clone)]
#[error("key {key_id} cannot produce an encryptor: {reason}")]
pub struct EncryptorUnavailable {
    pub key_id: KeyId,
    pub reason: String,
}

/// Failure inside an authenticated-encryption operation.
#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("ciphertext is malformed or truncated")]
    Malformed,

    #[error("authentication tag mismatch")]
    Unauthentic,

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}
