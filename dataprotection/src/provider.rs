//! Concurrent key ring cache with single-writer refresh
//!
//! The provider publishes an immutable [`CacheableKeyRing`] snapshot
//! through one atomic reference. Readers on the fast path never lock; a
//! single mutex gates refresh so at most one task talks to the repository
//! at a time, and contending readers fall back to the stale snapshot
//! instead of waiting. Only the very first call, when no snapshot exists
//! yet, blocks until refresh completes or fails.

use std::cmp;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dataprotection_keys::key::Key;
use dataprotection_keys::manager::KeyManager;

use crate::clock::{jittered, Clock, SystemClock};
use crate::error::{KeyRingError, KeyRingResult};
use crate::options::KeyManagementOptions;
use crate::resolver::DefaultKeyResolver;
use crate::ring::{CacheableKeyRing, KeyRing};

/// Grace period served from the previous snapshot after a failed refresh,
/// so transient repository outages do not turn into a retry stampede.
fn refresh_failure_backoff() -> Duration {
    Duration::minutes(2)
}

pub struct KeyRingProvider {
    key_manager: Arc<dyn KeyManager>,
    options: KeyManagementOptions,
    resolver: DefaultKeyResolver,
    clock: Arc<dyn Clock>,
    cached: ArcSwapOption<CacheableKeyRing>,
    refresh_gate: Mutex<()>,
}

impl KeyRingProvider {
    pub fn new(key_manager: Arc<dyn KeyManager>, options: KeyManagementOptions) -> Self {
        Self::with_clock(key_manager, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        key_manager: Arc<dyn KeyManager>,
        options: KeyManagementOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = DefaultKeyResolver::new(&options);
        Self {
            key_manager,
            options,
            resolver,
            clock,
            cached: ArcSwapOption::empty(),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Returns the current key ring, refreshing the cached snapshot if it
    /// has gone stale.
    ///
    /// While another task is refreshing, callers are served the previous
    /// snapshot immediately, stale or not; a reader never waits once any
    /// snapshot exists. The task that performs a failing refresh sees the
    /// error itself even when a previous snapshot was retained.
    pub async fn get_current_key_ring(&self) -> KeyRingResult<Arc<KeyRing>> {
        let now = self.clock.utc_now();
        if let Some(snapshot) = self.cached.load_full() {
            if snapshot.is_valid(now) {
                return Ok(snapshot.key_ring());
            }
        }

        let _gate = match self.refresh_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                if let Some(snapshot) = self.cached.load_full() {
                    return Ok(snapshot.key_ring());
                }
                // No snapshot has ever been published; this caller has
                // nothing to fall back on and must wait its turn.
                self.refresh_gate.lock().await
            }
        };

        // Double-check: the refresh we contended with may have published.
        let now = self.clock.utc_now();
        if let Some(snapshot) = self.cached.load_full() {
            if snapshot.is_valid(now) {
                return Ok(snapshot.key_ring());
            }
        }

        match self.refresh_key_ring(now).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.cached.store(Some(Arc::clone(&snapshot)));
                Ok(snapshot.key_ring())
            }
            Err(err) => {
                if let Some(previous) = self.cached.load_full() {
                    let extended_until = now + refresh_failure_backoff();
                    warn!(
                        error = %err,
                        %extended_until,
                        "key ring refresh failed; serving the previous ring through the backoff window"
                    );
                    self.cached
                        .store(Some(Arc::new(previous.with_extended_lifetime(extended_until))));
                }
                Err(err)
            }
        }
    }

    /// One refresh pass: read the repository, run policy, possibly create
    /// a key, and assemble the snapshot. Runs under the refresh gate.
    async fn refresh_key_ring(&self, now: DateTime<Utc>) -> KeyRingResult<CacheableKeyRing> {
        debug!(%now, "refreshing key ring");
        let result = self.refresh_key_ring_core(now).await;
        match &result {
            Ok(snapshot) => {
                debug!(expiration_time = %snapshot.expiration_time(), "key ring refresh complete");
            }
            Err(err) => debug!(error = %err, "key ring refresh failed"),
        }
        result
    }

    /// When policy asks for a key that does not exist yet, the loop
    /// creates it and resolves once more so the fresh key is judged like
    /// any other; the `key_just_added` slot bounds this to two passes.
    async fn refresh_key_ring_core(&self, now: DateTime<Utc>) -> KeyRingResult<CacheableKeyRing> {
        let mut key_just_added: Option<Key> = None;
        loop {
            // Token before read: a mutation racing the read below then
            // fires the signal on the snapshot being built.
            let expiration_signal = self.key_manager.cache_expiration_token();
            let all_keys = self.key_manager.get_all_keys().await?;
            let resolution = self.resolver.resolve(now, &all_keys);

            if let Some(default_key) = resolution.default_key.clone() {
                if !resolution.should_generate_new_key {
                    return self.assemble_snapshot(now, default_key, &all_keys, expiration_signal);
                }
            }

            if let Some(new_key) = key_just_added.take() {
                // A key was already created this refresh; settle on the
                // best available choice instead of creating another.
                let default_key =
                    resolution.default_key.or(resolution.fallback_key).unwrap_or(new_key);
                return self.assemble_snapshot(now, default_key, &all_keys, expiration_signal);
            }

            if !self.options.auto_generate_keys {
                let Some(default_key) = resolution.default_key.or(resolution.fallback_key) else {
                    return Err(KeyRingError::NoDefaultKeyAutoGenerateDisabled);
                };
                info!(
                    key_id = %default_key.key_id(),
                    "policy requests a new key but auto-generation is disabled; keeping existing key"
                );
                return self.assemble_snapshot(now, default_key, &all_keys, expiration_signal);
            }

            let (activation_date, expiration_date) = match &resolution.default_key {
                // No default at all: the new key must serve immediately.
                None => (now, now + self.options.new_key_lifetime),
                // Default nearing expiry: the new key takes over when the
                // current one lapses.
                Some(default) => (default.expiration_date(), now + self.options.new_key_lifetime),
            };
            info!(%activation_date, %expiration_date, "policy requests a new key; creating");
            key_just_added =
                Some(self.key_manager.create_new_key(activation_date, expiration_date).await?);
        }
    }

    fn assemble_snapshot(
        &self,
        now: DateTime<Utc>,
        default_key: Key,
        all_keys: &[Key],
        expiration_signal: CancellationToken,
    ) -> KeyRingResult<CacheableKeyRing> {
        // A published default must be able to encrypt; the probe result is
        // memoized on the key, so this is free for keys the resolver
        // already examined.
        default_key.encryptor()?;

        let next_refresh_at = now + jittered(self.options.key_ring_refresh_period);
        let expiration_time = if default_key.expiration_date() <= now {
            // Serving an expired fallback; re-examine at the normal cadence.
            next_refresh_at
        } else {
            cmp::min(default_key.expiration_date(), next_refresh_at)
        };

        info!(
            default_key_id = %default_key.key_id(),
            %expiration_time,
            key_count = all_keys.len(),
            "key ring refreshed"
        );
        Ok(CacheableKeyRing::new(
            expiration_time,
            expiration_signal,
            KeyRing::new(default_key, all_keys),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex as SyncMutex;
    use uuid::Uuid;

    use dataprotection_keys::encryptor::AesGcmEncryptorFactory;
    use dataprotection_keys::error::{KeyManagerError, KeyManagerResult};

    use super::*;

    struct ScriptedKeyManager {
        keys: SyncMutex<Vec<Key>>,
        token: SyncMutex<CancellationToken>,
        get_all_calls: AtomicUsize,
        create_calls: AtomicUsize,
        fail_reads: AtomicBool,
    }

    impl ScriptedKeyManager {
        fn new(keys: Vec<Key>) -> Self {
            Self {
                keys: SyncMutex::new(keys),
                token: SyncMutex::new(CancellationToken::new()),
                get_all_calls: AtomicUsize::new(0),
                create_calls: AtomicUsize::new(0),
                fail_reads: AtomicBool::new(false),
            }
        }

        fn get_all_calls(&self) -> usize {
            self.get_all_calls.load(Ordering::SeqCst)
        }

        fn create_calls(&self) -> usize {
            self.create_calls.load(Ordering::SeqCst)
        }

        fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        fn last_created(&self) -> Key {
            self.keys.lock().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl KeyManager for ScriptedKeyManager {
        async fn get_all_keys(&self) -> KeyManagerResult<Vec<Key>> {
            self.get_all_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(KeyManagerError::Storage("key repository unavailable".to_string()));
            }
            Ok(self.keys.lock().clone())
        }

        async fn create_new_key(
            &self,
            activation_date: DateTime<Utc>,
            expiration_date: DateTime<Utc>,
        ) -> KeyManagerResult<Key> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let factory = Arc::new(AesGcmEncryptorFactory::generate().unwrap());
            let key = Key::new(
                Uuid::new_v4(),
                activation_date,
                activation_date,
                expiration_date,
                false,
                factory,
            );
            let mut keys = self.keys.lock();
            keys.push(key.clone());
            let fired = std::mem::replace(&mut *self.token.lock(), CancellationToken::new());
            fired.cancel();
            Ok(key)
        }

        fn cache_expiration_token(&self) -> CancellationToken {
            self.token.lock().clone()
        }
    }

    struct ManualClock {
        now: SyncMutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self { now: SyncMutex::new(start) }
        }

        fn set(&self, now: DateTime<Utc>) {
            *self.now.lock() = now;
        }
    }

    impl Clock for ManualClock {
        fn utc_now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 3, 1, 0, 0, 0).unwrap()
    }

    fn seeded_key(activation: DateTime<Utc>, expiration: DateTime<Utc>, revoked: bool) -> Key {
        let factory = Arc::new(AesGcmEncryptorFactory::generate().unwrap());
        Key::new(Uuid::new_v4(), activation, activation, expiration, revoked, factory)
    }

    fn provider_over(
        keys: Vec<Key>,
        options: KeyManagementOptions,
    ) -> (KeyRingProvider, Arc<ScriptedKeyManager>, Arc<ManualClock>) {
        let manager = Arc::new(ScriptedKeyManager::new(keys));
        let clock = Arc::new(ManualClock::new(t0()));
        let provider = KeyRingProvider::with_clock(
            Arc::clone(&manager) as Arc<dyn KeyManager>,
            options,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (provider, manager, clock)
    }

    #[tokio::test]
    async fn test_empty_repository_generates_initial_key() {
        let (provider, manager, _clock) =
            provider_over(vec![], KeyManagementOptions::default());

        let ring = provider.get_current_key_ring().await.unwrap();
        let default = ring.default_key();
        assert_eq!(default.activation_date(), t0());
        assert_eq!(default.expiration_date(), t0() + Duration::days(90));
        assert!(ring.find(&default.key_id()).is_some());

        // Initial read plus the re-read after creating the key.
        assert_eq!(manager.get_all_calls(), 2);
        assert_eq!(manager.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_repository_with_generation_disabled_fails() {
        let options = KeyManagementOptions { auto_generate_keys: false, ..Default::default() };
        let (provider, manager, _clock) = provider_over(vec![], options);

        let err = provider.get_current_key_ring().await.unwrap_err();
        assert!(matches!(err, KeyRingError::NoDefaultKeyAutoGenerateDisabled));
        assert!(provider.cached.load_full().is_none());
        assert_eq!(manager.create_calls(), 0);

        // Nothing was published, so the next call retries the repository.
        let err = provider.get_current_key_ring().await.unwrap_err();
        assert!(matches!(err, KeyRingError::NoDefaultKeyAutoGenerateDisabled));
        assert_eq!(manager.get_all_calls(), 2);
    }

    #[tokio::test]
    async fn test_mid_life_key_passes_through() {
        let k1 = seeded_key(t0() - Duration::days(10), t0() + Duration::days(80), false);
        let (provider, manager, _clock) =
            provider_over(vec![k1.clone()], KeyManagementOptions::default());

        let ring = provider.get_current_key_ring().await.unwrap();
        assert_eq!(ring.default_key_id(), k1.key_id());
        assert_eq!(manager.create_calls(), 0);
        assert_eq!(manager.get_all_calls(), 1);

        // The key outlives the refresh period, so the snapshot expires on
        // the jittered refresh cadence.
        let snapshot = provider.cached.load_full().unwrap();
        assert!(snapshot.expiration_time() <= t0() + Duration::hours(24));
        assert!(snapshot.expiration_time() >= t0() + Duration::minutes(24 * 60 * 4 / 5));
    }

    #[tokio::test]
    async fn test_near_expiry_creates_propagating_successor() {
        let k1 = seeded_key(t0() - Duration::days(89), t0() + Duration::days(1), false);
        let (provider, manager, _clock) =
            provider_over(vec![k1.clone()], KeyManagementOptions::default());

        let ring = provider.get_current_key_ring().await.unwrap();

        // The successor exists but is still propagating, so the old key
        // keeps the default slot until it lapses.
        assert_eq!(ring.default_key_id(), k1.key_id());
        assert_eq!(manager.create_calls(), 1);
        assert_eq!(manager.get_all_calls(), 2);

        let successor = manager.last_created();
        assert_eq!(successor.activation_date(), t0() + Duration::days(1));
        assert_eq!(successor.expiration_date(), t0() + Duration::days(90));
        assert!(ring.find(&successor.key_id()).is_some());

        let snapshot = provider.cached.load_full().unwrap();
        assert!(snapshot.expiration_time() <= t0() + Duration::days(1));
    }

    #[tokio::test]
    async fn test_revoked_candidate_remains_for_decryption() {
        let revoked = seeded_key(t0() - Duration::days(10), t0() + Duration::days(80), true);
        let k2 = seeded_key(t0() - Duration::days(5), t0() + Duration::days(85), false);
        let (provider, _manager, _clock) =
            provider_over(vec![revoked.clone(), k2.clone()], KeyManagementOptions::default());

        let ring = provider.get_current_key_ring().await.unwrap();
        assert_eq!(ring.default_key_id(), k2.key_id());

        let found = ring.find(&revoked.key_id()).unwrap();
        assert_eq!(found.key_id(), revoked.key_id());
        assert!(found.is_revoked());
    }

    #[tokio::test]
    async fn test_generation_disabled_serves_expired_fallback() {
        let expired = seeded_key(t0() - Duration::days(100), t0() - Duration::days(10), false);
        let options = KeyManagementOptions { auto_generate_keys: false, ..Default::default() };
        let (provider, manager, _clock) = provider_over(vec![expired.clone()], options);

        let ring = provider.get_current_key_ring().await.unwrap();
        assert_eq!(ring.default_key_id(), expired.key_id());
        assert_eq!(manager.create_calls(), 0);

        // An expired default cannot bound the snapshot lifetime; the
        // refresh cadence does.
        let snapshot = provider.cached.load_full().unwrap();
        assert!(snapshot.expiration_time() > t0());
        assert!(snapshot.expiration_time() <= t0() + Duration::hours(24));
    }

    #[tokio::test]
    async fn test_transient_failure_extends_previous_ring() {
        let k1 = seeded_key(t0() - Duration::days(10), t0() + Duration::days(80), false);
        let (provider, manager, clock) =
            provider_over(vec![k1.clone()], KeyManagementOptions::default());

        provider.get_current_key_ring().await.unwrap();
        assert_eq!(manager.get_all_calls(), 1);

        // The snapshot has lapsed and the repository is down.
        let outage = t0() + Duration::hours(25);
        clock.set(outage);
        manager.fail_reads(true);

        let err = provider.get_current_key_ring().await.unwrap_err();
        assert!(matches!(err, KeyRingError::KeyManager(_)));
        assert_eq!(manager.get_all_calls(), 2);

        let snapshot = provider.cached.load_full().unwrap();
        assert_eq!(snapshot.expiration_time(), outage + Duration::minutes(2));

        // Inside the backoff window the previous ring is served without
        // touching the repository.
        clock.set(outage + Duration::minutes(1));
        let ring = provider.get_current_key_ring().await.unwrap();
        assert_eq!(ring.default_key_id(), k1.key_id());
        assert_eq!(manager.get_all_calls(), 2);

        // Past the window the refresh is attempted, and fails, again.
        clock.set(outage + Duration::minutes(3));
        provider.get_current_key_ring().await.unwrap_err();
        assert_eq!(manager.get_all_calls(), 3);
        let snapshot = provider.cached.load_full().unwrap();
        assert_eq!(
            snapshot.expiration_time(),
            outage + Duration::minutes(3) + Duration::minutes(2)
        );
    }

    #[tokio::test]
    async fn test_recovery_after_outage_publishes_fresh_ring() {
        let k1 = seeded_key(t0() - Duration::days(10), t0() + Duration::days(80), false);
        let (provider, manager, clock) =
            provider_over(vec![k1.clone()], KeyManagementOptions::default());

        provider.get_current_key_ring().await.unwrap();
        clock.set(t0() + Duration::hours(25));
        manager.fail_reads(true);
        provider.get_current_key_ring().await.unwrap_err();

        manager.fail_reads(false);
        clock.set(t0() + Duration::hours(25) + Duration::minutes(3));
        let ring = provider.get_current_key_ring().await.unwrap();
        assert_eq!(ring.default_key_id(), k1.key_id());

        let snapshot = provider.cached.load_full().unwrap();
        assert!(snapshot.is_valid(t0() + Duration::hours(25) + Duration::minutes(4)));
    }
}
