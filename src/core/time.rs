use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Clock abstraction so every expiry decision in the core reads time from one place.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration) -> tokio::time::Sleep;
}

/// System-backed clock; replaceable in tests.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Manually advanced clock for deterministic timer tests.
///
/// `sleep` still delegates to tokio so background loops keep yielding; only
/// `now` is frozen until [`ManualClock::advance`] moves it.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
        let mut guard = self.now.lock();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Convert whole seconds into a chrono offset, saturating at `TimeDelta::MAX`.
pub fn secs(value: u64) -> ChronoDuration {
    i64::try_from(value)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}

/// `at` plus `seconds`, saturating at the latest representable instant.
pub fn after_secs(at: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    at.checked_add_signed(secs(seconds))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + ChronoDuration::seconds(10));
        let copy = clock.clone();
        copy.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), start + ChronoDuration::seconds(11));
    }

    #[test]
    fn oversized_offsets_saturate() {
        assert_eq!(secs(u64::MAX), ChronoDuration::MAX);
        assert_eq!(secs(90), ChronoDuration::seconds(90));
        let start = Utc::now();
        assert_eq!(after_secs(start, u64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(after_secs(start, 30), start + ChronoDuration::seconds(30));
    }
}
