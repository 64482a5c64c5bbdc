//! Time sources for the HTTP layers.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use time::OffsetDateTime;

/// A source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// The current time.
    fn now(&self) -> OffsetDateTime;

    /// Time elapsed since `start`; zero if `start` lies in the future.
    fn since(&self, start: OffsetDateTime) -> Duration {
        Duration::try_from(self.now() - start).unwrap_or_default()
    }
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A manually driven clock for tests. Clones share the same time.
#[derive(Clone, Debug)]
pub struct MockClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH)
    }
}

impl MockClock {
    /// Creates a clock stopped at `start`.
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_all_clones() {
        let clock = MockClock::default();
        let start = clock.now();
        clock.clone().advance(Duration::from_secs(1));
        assert_eq!(clock.since(start), Duration::from_secs(1));
    }

    #[test]
    fn since_a_future_instant_is_zero() {
        let clock = MockClock::default();
        let future = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.since(future), Duration::ZERO);
    }
}
