//! Key ring error types

use thiserror::Error;

use dataprotection_keys::error::{EncryptorUnavailable, KeyManagerError};

pub type KeyRingResult<T> = Result<T, KeyRingError>;

#[derive(Error, Debug)]
pub enum KeyRingError {
    /// Policy demands a new default key, generation is disabled, and no
    /// usable fallback exists. Not retryable until an operator adds or
    /// repairs a key.
    #[error("the key ring has no usable default key and automatic key generation is disabled")]
    NoDefaultKeyAutoGenerateDisabled,

    /// Repository failure during refresh. Transient: with a previously
    /// published ring the provider keeps serving it for a grace window.
    #[error("key manager failure while refreshing the key ring")]
    KeyManager(#[from] KeyManagerError),

    #[error(transparent)]
    EncryptorUnavailable(#[from] EncryptorUnavailable),
}
