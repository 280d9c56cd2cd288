//! Time sources.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::datetime::normalize::UtcInstant;

/// Source of the current time for expiry and breaker windows.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> UtcInstant;
}

/// Wall clock, always UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcInstant {
        UtcInstant::from_datetime(Utc::now())
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: UtcInstant) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Jump to an absolute instant (may go backwards).
    pub fn set(&self, to: UtcInstant) {
        self.millis.store(to.as_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(UtcInstant::EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcInstant {
        let millis = self.millis.load(Ordering::SeqCst);
        UtcInstant::from_millis(millis).unwrap_or(UtcInstant::EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::default();
        assert_eq!(clock.now(), UtcInstant::EPOCH);

        clock.advance(Duration::from_millis(1_250));
        assert_eq!(clock.now().as_millis(), 1_250);

        clock.set(UtcInstant::from_millis(10).unwrap());
        assert_eq!(clock.now().as_millis(), 10);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        let now = SystemClock.now();
        assert!(now.as_millis() > 1_577_836_800_000);
    }
}
