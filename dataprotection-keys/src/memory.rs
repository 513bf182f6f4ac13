//! In-memory key manager
//!
//! Backs tests, demos, and single-process deployments. Production
//! deployments implement [`KeyManager`] over durable storage instead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::encryptor::AesGcmEncryptorFactory;
use crate::error::{KeyManagerError, KeyManagerResult};
use crate::key::{Key, KeyId};
use crate::manager::KeyManager;

pub struct InMemoryKeyManager {
    state: RwLock<State>,
}

struct State {
    keys: Vec<Key>,
    expiration_token: CancellationToken,
}

impl InMemoryKeyManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                keys: Vec::new(),
                expiration_token: CancellationToken::new(),
            }),
        }
    }

    /// Seeds a pre-built key, firing the change signal.
    pub fn insert_key(&self, key: Key) {
        let mut state = self.state.write();
        state.keys.push(key);
        Self::signal_mutation(&mut state);
    }

    /// Marks the given key revoked. Revocation is monotonic; the key stays
    /// listed so previously protected payloads still find it.
    pub fn revoke_key(&self, key_id: KeyId) -> KeyManagerResult<()> {
        let mut state = self.state.write();
        let slot = state
            .keys
            .iter_mut()
            .find(|key| key.key_id() == key_id)
            .ok_or(KeyManagerError::KeyNotFound(key_id))?;
        if !slot.is_revoked() {
            *slot = slot.as_revoked();
            info!(%key_id, "key revoked");
            Self::signal_mutation(&mut state);
        }
        Ok(())
    }

    fn signal_mutation(state: &mut State) {
        // Readers hold the previous token; fire it and arm a fresh one.
        let fired = std::mem::replace(&mut state.expiration_token, CancellationToken::new());
        fired.cancel();
    }
}

impl Default for InMemoryKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn get_all_keys(&self) -> KeyManagerResult<Vec<Key>> {
        Ok(self.state.read().keys.clone())
    }

    async fn create_new_key(
        &self,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
    ) -> KeyManagerResult<Key> {
        let factory = AesGcmEncryptorFactory::generate()
            .map_err(|e| KeyManagerError::Storage(format!("key material generation failed: {e:#}")))?;
        // A key activated retroactively records its creation at the
        // activation instant to keep the descriptor ordering invariant.
        let creation_date = Utc::now().min(activation_date);
        let key = Key::new(
            Uuid::new_v4(),
            creation_date,
            activation_date,
            expiration_date,
            false,
            Arc::new(factory),
        );

        let mut state = self.state.write();
        info!(key_id = %key.key_id(), %activation_date, %expiration_date, "created new key");
        state.keys.push(key.clone());
        Self::signal_mutation(&mut state);
        Ok(key)
    }

    fn cache_expiration_token(&self) -> CancellationToken {
        self.state.read().expiration_token.clone()
    }
}
