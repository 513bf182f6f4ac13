//! Data-protection key ring core
//!
//! This crate maintains a lifetime policy over a set of authenticated-
//! encryption keys and hands callers the key ring to use right now: a
//! distinguished default key for new encryptions plus a lookup table
//! covering every key needed to decrypt older payloads.
//!
//! A [`KeyRingProvider`] caches an immutable snapshot of the resolved
//! ring and refreshes it from a [`KeyManager`] with at most one refresh
//! in flight; readers holding a usable snapshot are never blocked, even
//! when it has gone stale. Default-key election, the propagation window,
//! and clock-skew handling live in [`DefaultKeyResolver`].

pub mod clock;
pub mod error;
pub mod options;
pub mod provider;
pub mod resolver;
pub mod ring;

pub use clock::{Clock, SystemClock};
pub use error::{KeyRingError, KeyRingResult};
pub use options::KeyManagementOptions;
pub use provider::KeyRingProvider;
pub use resolver::{DefaultKeyResolution, DefaultKeyResolver};
pub use ring::{CacheableKeyRing, KeyRing};

// Re-export the storage-facing layer so most callers depend on this crate
// alone.
pub use dataprotection_keys::{
    AesGcmEncryptorFactory, Encryptor, EncryptorFactory, EncryptorUnavailable,
    InMemoryKeyManager, Key, KeyDescriptor, KeyId, KeyManager, KeyManagerError,
    KeyManagerResult,
};
