//! Clock abstraction for testable time-dependent logic.
//!
//! Every timestamp the engine produces (poll run ids, TTL dedupe windows,
//! scheduler cooldowns) flows through this trait rather than `Utc::now()`
//! directly, so poll-worker and scheduler behavior can be driven
//! deterministically in tests.

use chrono::{DateTime, Utc};

/// Abstracts "what time is it" so business logic is deterministic under test.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
