//! Monotonic clock facade for deadline arithmetic.
//!
//! All deadlines in this crate are absolute instants on the monotonic clock,
//! so wall-clock adjustments never move a scope's budget.

use std::time::{Duration, Instant};

/// Monotonic time source used to derive deadlines from relative timeouts.
///
/// A `None` timeout or deadline means "unbounded": no deadline is computed
/// and no remaining budget exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock;

impl Clock {
    /// Creates a new clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Returns the current monotonic instant.
    #[must_use]
    pub fn now(self) -> Instant {
        Instant::now()
    }

    /// Computes an absolute deadline from a relative timeout.
    ///
    /// Returns `None` for a `None` timeout, meaning the scope is unbounded.
    #[must_use]
    pub fn deadline(self, timeout: Option<Duration>) -> Option<Instant> {
        timeout.map(|timeout| self.now() + timeout)
    }

    /// Returns the budget left until `deadline`, saturating at zero.
    ///
    /// Returns `None` for a `None` deadline (unbounded).
    #[must_use]
    pub fn remaining(self, deadline: Option<Instant>) -> Option<Duration> {
        deadline.map(|deadline| deadline.saturating_duration_since(self.now()))
    }
}

/// Computes an absolute deadline from a relative timeout.
///
/// Convenience for [`Clock::deadline`].
#[must_use]
pub fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    Clock.deadline(timeout)
}

/// Returns the budget left until `deadline`, saturating at zero.
///
/// Convenience for [`Clock::remaining`].
#[must_use]
pub fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    Clock.remaining(deadline)
}
