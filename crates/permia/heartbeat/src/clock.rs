//! Wall-clock sources used for heartbeat accounting

use auto_impl::auto_impl;
use parking_lot::Mutex;
use std::{
    fmt::Debug,
    time::{Duration, SystemTime},
};

/// Source of the current wall-clock time.
#[auto_impl(&, Arc, Box)]
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time
    fn now(&self) -> SystemTime;
}

/// Clock backed by [`SystemTime::now`]
#[derive(Debug, Default, Clone, Copy)]
#[non_exhaustive]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
///
/// Used by tests and simulations that need deterministic accounting.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    /// Create a clock frozen at `now`
    pub const fn new(now: SystemTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Set the clock to an arbitrary instant, possibly in the past
    pub fn set(&self, to: SystemTime) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start + Duration::from_secs(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
