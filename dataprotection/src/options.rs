//! Key management policy parameters

use chrono::Duration;

/// Policy parameters for key lifetime management and key ring refresh.
///
/// The provider clones the options it is constructed with; mutating the
/// caller's instance afterwards has no effect on a running provider.
#[derive(Debug, Clone)]
pub struct KeyManagementOptions {
    /// Whether the provider may create keys when policy demands one.
    pub auto_generate_keys: bool,

    /// Lifetime of newly generated keys.
    pub new_key_lifetime: Duration,

    /// Interval after activation during which a key is assumed to still be
    /// propagating to peer nodes and is not yet chosen as default.
    pub key_propagation_window: Duration,

    /// Clock drift budget between servers sharing the repository.
    pub max_server_clock_skew: Duration,

    /// Upper bound on snapshot staleness absent a change signal.
    pub key_ring_refresh_period: Duration,
}

impl Default for KeyManagementOptions {
    fn default() -> Self {
        Self {
            auto_generate_keys: true,
            new_key_lifetime: Duration::days(90),
            key_propagation_window: Duration::days(2),
            max_server_clock_skew: Duration::minutes(5),
            key_ring_refresh_period: Duration::hours(24),
        }
    }
}
