//! Error types for bounded scopes.
//!
//! A bounded scope surfaces exactly one of two faults at its boundary:
//! [`CancelError::Timeout`] when its own deadline passed, or
//! [`CancelError::Cancelled`] when something else terminated it. Every other
//! error from the wrapped work propagates through unchanged.

use crate::clock::Clock;
use std::time::Instant;
use thiserror::Error;

/// The fault raised out of a bounded scope that did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelError {
    /// The scope's own deadline passed before it exited.
    #[error("scope exceeded its deadline")]
    Timeout,

    /// The scope was cancelled before its own deadline passed, either
    /// manually or by cascade from an outer scope.
    #[error("scope was cancelled")]
    Cancelled,
}

impl CancelError {
    /// Classifies a fired cancellation as a timeout or an external cancel.
    ///
    /// The deadline is re-checked against the monotonic clock at the moment
    /// the fault is constructed rather than trusting which mechanism fired,
    /// because an outer cancellation and this scope's own deadline can race
    /// at the same instant. This is a best-effort heuristic: extreme
    /// scheduling delay between firing and classification can still
    /// misattribute the fault.
    #[must_use]
    pub fn classify(deadline: Option<Instant>) -> Self {
        match deadline {
            Some(deadline) if Clock.now() >= deadline => Self::Timeout,
            _ => Self::Cancelled,
        }
    }
}

/// The alarm strategy was requested from a thread that cannot own
/// process-wide signal handling.
///
/// This is a programming error raised at scope construction, before any
/// timer is armed. It must not be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("alarm based timeouts can only be used on the signal-capable thread")]
pub struct InvalidEnforcerError;
