//! Monotonic time source
//!
//! Deadlines and wait expiry are computed from a [`Clock`], never from wall
//! time, so clock adjustments cannot shorten or stretch a call's timeout.

use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Monotonic clock
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Absolute deadline `timeout` from now
    fn deadline_after(&self, timeout: Duration) -> Instant {
        let now = self.now();
        now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400 * 365))
    }
}

/// [`Clock`] backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
