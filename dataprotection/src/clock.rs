//! Injected wall-clock and refresh jitter

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Source of the current UTC instant.
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Narrows the refresh period to (0.8·p, p] so nodes that refreshed at the
/// same instant fan out instead of hitting the repository together again.
///
/// The fudge factor comes from the thread-local RNG, which is seeded from
/// OS entropy once per thread; this is scheduling jitter, not key material.
pub(crate) fn jittered(period: Duration) -> Duration {
    let fudge: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let millis = period.num_milliseconds() as f64 * (1.0 - fudge * 0.2);
    Duration::milliseconds(millis as i64)
}
