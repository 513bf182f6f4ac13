//! Key descriptors and the lazily constructed per-key encryptor

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encryptor::{Encryptor, EncryptorFactory};
use crate::error::EncryptorUnavailable;

/// 128-bit key identifier.
pub type KeyId = Uuid;

/// Record form of a key descriptor.
///
/// This is the shape a key repository persists and exchanges; the key
/// material itself is stored separately (typically enveloped) and comes
/// back as an [`EncryptorFactory`] when the record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub key_id: KeyId,
    pub creation_date: DateTime<Utc>,
    pub activation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

/// Immutable key descriptor plus its lazily probed encryptor.
///
/// Cloning is cheap; clones share the descriptor and the memoized encryptor
/// outcome. Descriptors obey `creation <= activation < expiration`.
#[derive(Clone)]
pub struct Key {
    inner: Arc<KeyInner>,
}

struct KeyInner {
    descriptor: KeyDescriptor,
    factory: Arc<dyn EncryptorFactory>,
    encryptor: OnceLock<Result<Arc<dyn Encryptor>, EncryptorUnavailable>>,
}

impl Key {
    pub fn new(
        key_id: KeyId,
        creation_date: DateTime<Utc>,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
        revoked: bool,
        factory: Arc<dyn EncryptorFactory>,
    ) -> Self {
        Self::from_descriptor(
            KeyDescriptor { key_id, creation_date, activation_date, expiration_date, revoked },
            factory,
        )
    }

    pub fn from_descriptor(descriptor: KeyDescriptor, factory: Arc<dyn EncryptorFactory>) -> Self {
        debug_assert!(descriptor.creation_date <= descriptor.activation_date);
        debug_assert!(descriptor.activation_date < descriptor.expiration_date);
        Self { inner: Arc::new(KeyInner { descriptor, factory, encryptor: OnceLock::new() }) }
    }

    pub fn key_id(&self) -> KeyId {
        self.inner.descriptor.key_id
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.inner.descriptor.creation_date
    }

    pub fn activation_date(&self) -> DateTime<Utc> {
        self.inner.descriptor.activation_date
    }

    pub fn expiration_date(&self) -> DateTime<Utc> {
        self.inner.descriptor.expiration_date
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.descriptor.revoked
    }

    pub fn descriptor(&self) -> &KeyDescriptor {
        &self.inner.descriptor
    }

    /// The key's encryptor.
    ///
    /// The first call runs the factory; the outcome, success or captured
    /// failure, is memoized and returned verbatim ever after. A key whose
    /// factory failed stays available for descriptor lookups but reports
    /// itself unusable here.
    pub fn encryptor(&self) -> Result<Arc<dyn Encryptor>, EncryptorUnavailable> {
        self.inner
            .encryptor
            .get_or_init(|| {
                self.inner.factory.create_encryptor().map_err(|source| EncryptorUnavailable {
                    key_id: self.inner.descriptor.key_id,
                    reason: format!("{source:#}"),
                })
            })
            .clone()
    }

    /// Copy of this key with the revocation flag set.
    ///
    /// Revocation is monotonic; there is no inverse operation.
    pub fn as_revoked(&self) -> Key {
        let mut descriptor = self.inner.descriptor.clone();
        descriptor.revoked = true;
        Key::from_descriptor(descriptor, Arc::clone(&self.inner.factory))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("key_id", &self.inner.descriptor.key_id)
            .field("creation_date", &self.inner.descriptor.creation_date)
            .field("activation_date", &self.inner.descriptor.activation_date)
            .field("expiration_date", &self.inner.descriptor.expiration_date)
            .field("revoked", &self.inner.descriptor.revoked)
            .finish_non_exhaustive()
    }
}
