//! Deterministic test doubles.

use chrono::{DateTime, Utc};
use tablewatch_core::clock::Clock;

/// A clock that always returns the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Builds a clock fixed at `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// Returns a clock advanced by `duration`, for tests exercising
    /// multi-tick sequences without real sleeps.
    #[must_use]
    pub fn advance(&self, duration: chrono::Duration) -> Self {
        Self::new(self.time + duration)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Builds a fixed clock at `2026-02-14T20:00:00Z`, chosen to sit inside a
/// typical dinner-anchor bucket window for tests that need a recognizable
/// `date_str`/`time_slot` pairing.
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which never happens.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2026-02-14T20:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_stable() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn advance_moves_forward() {
        let clock = test_clock();
        let later = clock.advance(chrono::Duration::minutes(5));
        assert!(later.now() > clock.now());
    }
}
