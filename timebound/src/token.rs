//! Cancellation token shared by every enforcement strategy.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The side effect that performs the actual interruption for a token.
///
/// Supplied by the enforcement strategy at construction: cancel a cooperative
/// scope, re-raise the alarm signal, or deposit a fault for the supervised
/// thread to observe.
pub type CancelFn = Box<dyn Fn() + Send + Sync>;

/// Tracks whether one bounded scope was cancelled or completed.
///
/// A token ends in exactly one terminal state. Cancellation wins any race:
/// a completed token refuses to become cancelled, and a cancelled token
/// refuses to become completed. The token has no knowledge of *how*
/// cancellation is enforced; strategies differ only in the [`CancelFn`] they
/// install and in how they detect that time is up.
pub struct CancelToken {
    /// The relative timeout this token was created with, if any.
    timeout: Option<Duration>,
    /// Absolute monotonic deadline derived from `timeout` at creation.
    deadline: Option<Instant>,
    /// Invoked by [`cancel`](Self::cancel), never while the state lock is held.
    cancel_fn: CancelFn,
    state: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    cancelled: bool,
    completed: bool,
    chained: Vec<Arc<CancelToken>>,
}

impl CancelToken {
    /// Creates a token with the given timeout and cancellation side effect.
    ///
    /// The deadline is computed from `timeout` at construction and is
    /// immutable afterwards.
    pub fn new(
        timeout: Option<Duration>,
        cancel_fn: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            deadline: Clock.deadline(timeout),
            cancel_fn: Box::new(cancel_fn),
            state: Mutex::new(TokenState::default()),
        })
    }

    /// Creates a token with no deadline and a no-op cancellation side effect.
    ///
    /// Used where enforcement is unavailable; the token can still be marked
    /// cancelled manually or through chaining.
    pub fn unenforced() -> Arc<Self> {
        Self::new(None, || {})
    }

    /// The relative timeout this token was created with.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The absolute monotonic deadline, if the token is bounded.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels the scope this token guards.
    ///
    /// Marks the token cancelled and, if that succeeded, invokes the
    /// enforcement side effect. Returns `false` without invoking the side
    /// effect if the scope already completed.
    pub fn cancel(&self) -> bool {
        if self.mark_cancelled() {
            debug!(token = ?self, "cancelling");
            (self.cancel_fn)();
            true
        } else {
            false
        }
    }

    /// Marks this token and all currently-chained children as cancelled.
    ///
    /// Refuses (returns `false`) if the scope already completed. Cascading
    /// only updates state; no child's cancellation side effect is invoked.
    pub fn mark_cancelled(&self) -> bool {
        let mut state = self.state.lock();
        if state.completed {
            return false;
        }

        debug!(timeout = ?self.timeout, "marked scope token as cancelled");
        state.cancelled = true;
        for child in &state.chained {
            child.mark_cancelled();
        }

        true
    }

    /// Marks this token as completed.
    ///
    /// Refuses (returns `false`) if the scope was already cancelled;
    /// cancellation wins any race with completion.
    pub fn mark_completed(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }

        debug!(timeout = ?self.timeout, "marked scope token as completed");
        state.completed = true;
        true
    }

    /// Returns whether this token was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Returns whether this token completed.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Links `child` so that cancelling this token also cancels it.
    ///
    /// If this token is already cancelled, `child` is marked cancelled
    /// immediately; registering it for a future cascade would miss a
    /// cancellation that was already decided.
    pub fn chain(&self, child: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.cancelled {
            child.mark_cancelled();
        } else {
            state.chained.push(Arc::clone(child));
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CancelToken")
            .field("timeout", &self.timeout)
            .field("cancelled", &state.cancelled)
            .field("completed", &state.completed)
            .field("chained", &state.chained.len())
            .finish()
    }
}
