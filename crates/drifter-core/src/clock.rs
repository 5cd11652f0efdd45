use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

// ---------------------------------------------------------------------------
// Clock — injectable time source
// ---------------------------------------------------------------------------

/// Source of "now" for the orchestrator.
///
/// Production code uses [`SystemClock`]; tests use [`ManualClock`] and drive
/// time forward explicitly so lifespan expiry is deterministic under
/// single-shot ticks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().expect("ManualClock lock poisoned");
        *now += Duration::seconds(secs);
    }

    /// Advance the clock by an arbitrary duration.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("ManualClock lock poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("ManualClock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_on_advance() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start);

        clock.advance_secs(7);
        assert_eq!(clock.now(), start + Duration::seconds(7));

        clock.advance(Duration::milliseconds(500));
        assert_eq!(clock.now(), start + Duration::milliseconds(7500));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
