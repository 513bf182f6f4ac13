//! Default key resolution policy
//!
//! Pure selection over the known keys: which key encrypts new payloads
//! right now, which key is the last resort if generation is disabled, and
//! whether a new key ought to be created. The rules exist for cluster
//! agreement: a freshly minted key is withheld from defaulting until its
//! propagation window has passed, clock drift is absorbed by a skew
//! budget, and ties resolve deterministically on the key id.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use dataprotection_keys::key::Key;

use crate::options::KeyManagementOptions;

/// Outcome of a resolution pass.
#[derive(Debug, Clone)]
pub struct DefaultKeyResolution {
    /// Key that should encrypt new payloads at this instant.
    pub default_key: Option<Key>,

    /// Last-resort key, populated only when no default exists; used when
    /// policy demands a new key but generation is disabled.
    pub fallback_key: Option<Key>,

    /// Whether a new key ought to be created.
    pub should_generate_new_key: bool,
}

/// Pure policy function choosing the current default key.
pub struct DefaultKeyResolver {
    key_propagation_window: Duration,
    max_server_clock_skew: Duration,
}

impl DefaultKeyResolver {
    pub fn new(options: &KeyManagementOptions) -> Self {
        Self {
            key_propagation_window: options.key_propagation_window,
            max_server_clock_skew: options.max_server_clock_skew,
        }
    }

    /// Resolves the default key policy at `now` over `keys`.
    ///
    /// Never fails: a key whose encryptor cannot be constructed is demoted
    /// from candidacy, with the failure captured on the key itself.
    pub fn resolve(&self, now: DateTime<Utc>, keys: &[Key]) -> DefaultKeyResolution {
        let default_key = self.find_default_key(now, keys);

        let should_generate_new_key = match &default_key {
            None => true,
            Some(default) => {
                let expires_soon = default.expiration_date() - now
                    <= self.key_propagation_window + self.max_server_clock_skew;
                expires_soon && !self.has_usable_successor(now, keys, default)
            }
        };

        let fallback_key =
            if default_key.is_none() { self.find_fallback_key(now, keys) } else { None };

        DefaultKeyResolution { default_key, fallback_key, should_generate_new_key }
    }

    /// A key is active when it is inside its validity window, with the
    /// skew budget applied, and has not been revoked.
    fn is_active(&self, now: DateTime<Utc>, key: &Key) -> bool {
        let skewed_now = now + self.max_server_clock_skew;
        !key.is_revoked()
            && key.activation_date() <= skewed_now
            && skewed_now < key.expiration_date()
    }

    /// Probes the key's encryptor. A failure demotes the key from default
    /// candidacy; it stays available for decryption lookups.
    fn is_usable(key: &Key) -> bool {
        match key.encryptor() {
            Ok(_) => true,
            Err(err) => {
                warn!(key_id = %key.key_id(), %err, "key demoted from default candidacy");
                false
            }
        }
    }

    fn find_default_key(&self, now: DateTime<Utc>, keys: &[Key]) -> Option<Key> {
        let mut candidates: Vec<&Key> = keys.iter().filter(|key| self.is_active(now, key)).collect();
        Self::sort_latest_first(&mut candidates);

        let propagation_floor = now - self.key_propagation_window;
        candidates
            .iter()
            .copied()
            .filter(|key| key.activation_date() <= propagation_floor)
            .find(|key| Self::is_usable(key))
            .or_else(|| {
                // Nothing has finished propagating; accept any already
                // activated key rather than leaving the ring defaultless.
                candidates
                    .iter()
                    .copied()
                    .filter(|key| key.activation_date() <= now)
                    .find(|key| Self::is_usable(key))
            })
            .cloned()
    }

    /// True when a usable key activating after `default` already exists,
    /// meaning the nearing expiration of `default` resolves on its own.
    fn has_usable_successor(&self, now: DateTime<Utc>, keys: &[Key], default: &Key) -> bool {
        keys.iter().any(|key| {
            self.is_active(now, key)
                && key.activation_date() > default.activation_date()
                && Self::is_usable(key)
        })
    }

    /// The fallback may already be expired; it only has to be activated,
    /// unrevoked, and able to produce an encryptor.
    fn find_fallback_key(&self, now: DateTime<Utc>, keys: &[Key]) -> Option<Key> {
        let skewed_now = now + self.max_server_clock_skew;
        let mut candidates: Vec<&Key> = keys
            .iter()
            .filter(|key| !key.is_revoked() && key.activation_date() <= skewed_now)
            .collect();
        Self::sort_latest_first(&mut candidates);

        candidates.into_iter().find(|key| Self::is_usable(key)).cloned()
    }

    /// Latest activation first; equal activations resolve to the larger
    /// key id (byte-lexicographic) so every node elects the same key.
    fn sort_latest_first(candidates: &mut [&Key]) {
        candidates.sort_by(|a, b| {
            b.activation_date()
                .cmp(&a.activation_date())
                .then_with(|| b.key_id().cmp(&a.key_id()))
        });
    }
}
