//! Key ring views and the cacheable snapshot

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use dataprotection_keys::encryptor::Encryptor;
use dataprotection_keys::error::EncryptorUnavailable;
use dataprotection_keys::key::{Key, KeyId};

/// Immutable view handed to protect/unprotect callers: one default key for
/// new encryptions plus a lookup table over every key seen at refresh.
#[derive(Debug)]
pub struct KeyRing {
    default_key: Key,
    all_keys: HashMap<KeyId, Key>,
}

impl KeyRing {
    pub(crate) fn new(default_key: Key, all_keys: &[Key]) -> Self {
        let mut map = HashMap::with_capacity(all_keys.len() + 1);
        for key in all_keys {
            map.insert(key.key_id(), key.clone());
        }
        map.insert(default_key.key_id(), default_key.clone());
        Self { default_key, all_keys: map }
    }

    pub fn default_key(&self) -> &Key {
        &self.default_key
    }

    pub fn default_key_id(&self) -> KeyId {
        self.default_key.key_id()
    }

    /// Encryptor of the default key. The provider proved construction
    /// succeeds before publishing the ring, so this is a memoized lookup.
    pub fn default_encryptor(&self) -> Result<Arc<dyn Encryptor>, EncryptorUnavailable> {
        self.default_key.encryptor()
    }

    /// Looks up a key for decryption. Revoked and expired keys remain
    /// present so previously protected payloads still resolve.
    pub fn find(&self, key_id: &KeyId) -> Option<&Key> {
        self.all_keys.get(key_id)
    }
}

/// Published snapshot of the key ring with a definite expiry.
pub struct CacheableKeyRing {
    expiration_time: DateTime<Utc>,
    expiration_signal: CancellationToken,
    key_ring: Arc<KeyRing>,
}

impl CacheableKeyRing {
    pub(crate) fn new(
        expiration_time: DateTime<Utc>,
        expiration_signal: CancellationToken,
        key_ring: KeyRing,
    ) -> Self {
        Self { expiration_time, expiration_signal, key_ring: Arc::new(key_ring) }
    }

    /// A snapshot is valid while its expiry lies ahead and the change
    /// signal captured before the backing read has not fired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.expiration_signal.is_cancelled() && now < self.expiration_time
    }

    pub fn expiration_time(&self) -> DateTime<Utc> {
        self.expiration_time
    }

    pub fn key_ring(&self) -> Arc<KeyRing> {
        Arc::clone(&self.key_ring)
    }

    /// Same keys and signal, pushed-out expiry. Lets the provider keep
    /// serving the previous ring for a grace period after a failed refresh.
    pub(crate) fn with_extended_lifetime(&self, expiration_time: DateTime<Utc>) -> Self {
        Self {
            expiration_time,
            expiration_signal: self.expiration_signal.clone(),
            key_ring: Arc::clone(&self.key_ring),
        }
    }
}
