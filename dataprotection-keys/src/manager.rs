//! Key manager collaborator interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::KeyManagerResult;
use crate::key::Key;

/// Storage-facing key management seam the key ring core consumes.
///
/// Implementations sit on top of whatever stores the serialized key
/// records (files, a database, a registry) and must be safe to share
/// across threads.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Every key the repository knows, revoked keys included.
    async fn get_all_keys(&self) -> KeyManagerResult<Vec<Key>>;

    /// Creates and persists a new key.
    ///
    /// The create is atomic: once this returns, the key is visible to
    /// subsequent [`KeyManager::get_all_keys`] calls.
    async fn create_new_key(
        &self,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
    ) -> KeyManagerResult<Key>;

    /// Token that fires when the underlying key set changes out-of-band.
    ///
    /// Callers caching the result of [`KeyManager::get_all_keys`] must
    /// obtain the token *before* the read; a mutation racing the read then
    /// fires the token the caller already holds.
    fn cache_expiration_token(&self) -> CancellationToken;
}
