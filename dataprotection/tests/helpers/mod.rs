//! Shared fixtures for key ring provider integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use dataprotection::{Key, KeyManager, KeyManagerResult};

/// Decorator over a real key manager that counts calls and optionally
/// slows reads down to widen race windows.
pub struct InstrumentedKeyManager<M> {
    inner: Arc<M>,
    get_all_calls: AtomicUsize,
    create_calls: AtomicUsize,
    read_delay: Option<StdDuration>,
}

impl<M: KeyManager> InstrumentedKeyManager<M> {
    pub fn new(inner: Arc<M>) -> Self {
        Self {
            inner,
            get_all_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            read_delay: None,
        }
    }

    pub fn with_read_delay(inner: Arc<M>, read_delay: StdDuration) -> Self {
        Self { read_delay: Some(read_delay), ..Self::new(inner) }
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<M: KeyManager> KeyManager for InstrumentedKeyManager<M> {
    async fn get_all_keys(&self) -> KeyManagerResult<Vec<Key>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_all_keys().await
    }

    async fn create_new_key(
        &self,
        activation_date: DateTime<Utc>,
        expiration_date: DateTime<Utc>,
    ) -> KeyManagerResult<Key> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_new_key(activation_date, expiration_date).await
    }

    fn cache_expiration_token(&self) -> CancellationToken {
        self.inner.cache_expiration_token()
    }
}
