//! Deadline enforcement for cooperatively scheduled scopes.
//!
//! Bounds a future by racing it against the runtime's timer. Cancellation
//! takes effect at the scope's own suspension point: the losing future is
//! dropped, which is how a cooperative scheduler retires cancelled work.
//! This strategy never touches signals or threads, so it is usable from any
//! execution context.

use crate::clock::Clock;
use crate::errors::CancelError;
use crate::token::CancelToken;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// A cooperative bounded scope.
///
/// Obtain one from [`bound_async_at`] or [`bound_async_after`], grab the
/// [`token`](Self::token) for chaining or manual cancellation, then drive the
/// guarded future with [`run`](Self::run).
pub struct AsyncScope {
    token: Arc<CancelToken>,
    notify: Arc<Notify>,
    deadline: Option<Instant>,
}

/// Bounds a cooperative scope by an absolute monotonic deadline.
///
/// A `None` deadline means the scope runs unbounded; it can still be
/// cancelled manually through its token.
#[must_use]
pub fn bound_async_at(deadline: Option<Instant>) -> AsyncScope {
    let timeout = Clock.remaining(deadline);
    let notify = Arc::new(Notify::new());
    let cancel_notify = Arc::clone(&notify);
    let token = CancelToken::new(timeout, move || cancel_notify.notify_one());

    debug!(?timeout, "entered async cancel scope");
    AsyncScope {
        token,
        notify,
        deadline,
    }
}

/// Bounds a cooperative scope by a relative timeout.
///
/// Computes an absolute deadline and delegates to [`bound_async_at`].
#[must_use]
pub fn bound_async_after(timeout: Option<Duration>) -> AsyncScope {
    bound_async_at(Clock.deadline(timeout))
}

impl AsyncScope {
    /// The token guarding this scope.
    #[must_use]
    pub fn token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.token)
    }

    /// Runs `fut` inside the bounded scope.
    ///
    /// If the deadline fires or the token is cancelled first, the future is
    /// dropped, the token is marked cancelled, and the fault is classified by
    /// re-checking the deadline against the clock: [`CancelError::Timeout`]
    /// when the deadline has actually passed, [`CancelError::Cancelled`]
    /// otherwise (an outer scope's cancellation can fire this one before its
    /// own deadline).
    ///
    /// A token cancelled purely by cascade does not wake the scope; cascading
    /// only updates state. Waking requires [`CancelToken::cancel`].
    pub async fn run<T>(self, fut: impl Future<Output = T>) -> Result<T, CancelError> {
        let expired = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                }
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            value = fut => {
                // A concurrent cascade may already have cancelled the token;
                // in that case the refusal is ignored and the value still
                // flows out, since this scope's own enforcement never fired.
                self.token.mark_completed();
                Ok(value)
            }
            () = expired => {
                self.token.mark_cancelled();
                Err(CancelError::classify(self.token.deadline()))
            }
            () = self.notify.notified() => {
                self.token.mark_cancelled();
                Err(CancelError::classify(self.token.deadline()))
            }
        }
    }
}

impl std::fmt::Debug for AsyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncScope")
            .field("token", &self.token)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_completes_within_budget() {
        let scope = bound_async_after(Some(Duration::from_secs(5)));
        let token = scope.token();

        let value = tokio_test::assert_ok!(scope.run(async { 42 }).await);

        assert_eq!(value, 42);
        assert!(token.completed());
        assert!(!token.cancelled());
    }

    #[tokio::test]
    async fn test_deadline_fires_as_timeout() {
        let scope = bound_async_after(Some(Duration::from_millis(20)));
        let token = scope.token();

        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(result, Err(CancelError::Timeout));
        assert!(token.cancelled());
        assert!(!token.completed());
    }

    #[tokio::test]
    async fn test_manual_cancel_before_deadline_is_cancelled() {
        let scope = bound_async_after(Some(Duration::from_secs(30)));
        let token = scope.token();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;
        canceller.await.unwrap();

        assert_eq!(result, Err(CancelError::Cancelled));
        assert!(token.cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_run_wakes_immediately() {
        let scope = bound_async_after(Some(Duration::from_secs(30)));
        scope.token().cancel();

        let result = scope
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(result, Err(CancelError::Cancelled));
    }

    #[tokio::test]
    async fn test_unbounded_scope_completes() {
        let scope = bound_async_at(None);
        let token = scope.token();
        assert!(token.deadline().is_none());

        let result = scope
            .run(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                "done"
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert!(token.completed());
    }

    #[tokio::test]
    async fn test_cascade_does_not_wake_scope() {
        let outer = CancelToken::unenforced();
        let scope = bound_async_after(Some(Duration::from_secs(30)));
        outer.chain(&scope.token());

        // State-only cascade: the scope still runs to completion.
        outer.mark_cancelled();
        assert!(scope.token().cancelled());

        let result = scope.run(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
