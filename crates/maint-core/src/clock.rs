//! Time source used for scheduling timestamps and all waiting.
//!
//! Production code uses [`SystemClock`]; tests use `FakeClock`, whose
//! `sleep` advances virtual time instantly.

use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "fake"))]
use std::sync::Mutex;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Convert for timestamp arithmetic, saturating at chrono's maximum.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` moves `now` forward without blocking.
#[cfg(any(test, feature = "fake"))]
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Vec<Duration>>,
}

#[cfg(any(test, feature = "fake"))]
impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now
            .checked_add_signed(to_chrono(duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[cfg(any(test, feature = "fake"))]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(any(test, feature = "fake"))]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_sleep() {
        let clock = FakeClock::default();
        let start = clock.now();
        clock.sleep(Duration::from_secs(30));
        clock.sleep(Duration::from_secs(15));
        assert_eq!((clock.now() - start).num_seconds(), 45);
        assert_eq!(clock.total_slept(), Duration::from_secs(45));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn conversion_saturates() {
        assert_eq!(to_chrono(Duration::from_millis(1500)).num_milliseconds(), 1500);
        assert_eq!(to_chrono(Duration::from_secs(u64::MAX)), chrono::Duration::MAX);
    }

    #[test]
    fn advancing_past_the_end_of_time_pins_at_max() {
        let clock = FakeClock::default();
        clock.advance(Duration::from_secs(u64::MAX));
        assert_eq!(clock.now(), DateTime::<Utc>::MAX_UTC);
    }
}
