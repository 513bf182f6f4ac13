//! Key entities and storage-facing interfaces for the data-protection
//! key ring.
//!
//! This crate defines the [`Key`] descriptor with its lazily constructed
//! encryptor, the opaque authenticated-encryption seam
//! ([`Encryptor`]/[`EncryptorFactory`]), and the [`KeyManager`] interface
//! a key repository implements. An [`InMemoryKeyManager`] is included for
//! tests and single-process use.

pub mod encryptor;
pub mod error;
pub mod key;
pub mod manager;
pub mod memory;

pub use encryptor::{AesGcmEncryptorFactory, Encryptor, EncryptorFactory};
pub use error::{
    EncryptionError, EncryptorUnavailable, KeyManagerError, KeyManagerResult,
};
pub use key::{Key, KeyDescriptor, KeyId};
pub use manager::KeyManager;
pub use memory::InMemoryKeyManager;
