//! Alarm-based enforcement for the signal-capable thread.
//!
//! Arms a one-shot `ITIMER_REAL` and installs a `SIGALRM` handler for the
//! scope's lifetime. The handler is async-signal-safe: it only flips a
//! process-global flag, which the guard translates into token state at the
//! next [`CancelGuard::checkpoint`]. Because the handler is installed without
//! `SA_RESTART`, signal delivery still interrupts blocking syscalls (they
//! fail with `EINTR`), so even a blocked scope returns to a checkpoint early.
//! That benefit is what this strategy buys over the watcher; the cost is
//! that it is only valid on the one thread permitted to own process-wide
//! signal handling.
//!
//! Both the previous signal disposition and the previous interval timer are
//! saved on entry and restored on every exit path, so scopes nest without
//! leaking timer state.

use crate::dispatch::Capabilities;
use crate::errors::{CancelError, InvalidEnforcerError};
use crate::guard::{CancelGuard, FaultSlot};
use crate::token::CancelToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Set by the `SIGALRM` handler, read at checkpoints.
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigalrm(_signum: libc::c_int) {
    ALARM_FIRED.store(true, Ordering::SeqCst);
}

/// A bounded scope enforced by the real-time interval timer.
pub struct AlarmScope {
    token: Arc<CancelToken>,
    slot: Arc<FaultSlot>,
    timer: Option<SigalrmSlot>,
}

/// Bounds a synchronous scope on the signal-capable thread using `SIGALRM`.
///
/// Refuses with [`InvalidEnforcerError`] before arming anything unless the
/// caller holds the signal capability; signals are delivered process-wide
/// and only one thread may own their handling.
pub fn bound_alarm(
    timeout: Option<Duration>,
    caps: &Capabilities,
) -> Result<AlarmScope, InvalidEnforcerError> {
    if !caps.signal_capable() {
        return Err(InvalidEnforcerError);
    }
    Ok(AlarmScope::enter(timeout))
}

impl AlarmScope {
    pub(crate) fn enter(timeout: Option<Duration>) -> Self {
        // The manual cancel path re-raises SIGALRM so external cancellation
        // takes the same delivery route as the timer.
        let token = CancelToken::new(timeout, raise_sigalrm);
        let timer = SigalrmSlot::install(timeout);

        debug!(?timeout, "entered alarm based cancel scope");
        Self {
            token,
            slot: Arc::new(FaultSlot::default()),
            timer: Some(timer),
        }
    }

    /// The token guarding this scope.
    #[must_use]
    pub fn token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.token)
    }

    /// Runs `work` inside the bounded scope on the current thread.
    ///
    /// `work` observes cancellation through the guard's checkpoints; scope
    /// exit is the final checkpoint. The timer and signal disposition are
    /// restored on every exit path.
    pub fn run<T>(
        mut self,
        work: impl FnOnce(&CancelGuard) -> Result<T, CancelError>,
    ) -> Result<T, CancelError> {
        let guard = CancelGuard::with_alarm_flag(
            Arc::clone(&self.token),
            Arc::clone(&self.slot),
            &ALARM_FIRED,
        );
        let result = work(&guard);

        // Translate an alarm that fired during the closure's last stretch
        // before disarming clears the flag.
        let exit_check = guard.checkpoint();
        drop(self.timer.take());

        let value = result?;
        exit_check?;

        if self.token.mark_completed() {
            Ok(value)
        } else {
            Err(self
                .slot
                .get()
                .unwrap_or_else(|| CancelError::classify(self.token.deadline())))
        }
    }
}

impl std::fmt::Debug for AlarmScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmScope")
            .field("token", &self.token)
            .field("armed", &self.timer.is_some())
            .finish()
    }
}

#[allow(unsafe_code)]
fn raise_sigalrm() {
    unsafe {
        libc::raise(libc::SIGALRM);
    }
}

/// Saved `SIGALRM` disposition and `ITIMER_REAL` value.
///
/// Installing is paired with a guaranteed restore in `Drop`, so nested and
/// sequential scopes each see the state that preceded them.
struct SigalrmSlot {
    previous_action: libc::sigaction,
    previous_timer: Option<libc::itimerval>,
}

impl SigalrmSlot {
    #[allow(unsafe_code)]
    fn install(timeout: Option<Duration>) -> Self {
        ALARM_FIRED.store(false, Ordering::SeqCst);

        // SA_RESTART deliberately left unset so blocking syscalls are
        // interrupted rather than transparently restarted.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_sigalrm as libc::sighandler_t;
        let mut previous_action: libc::sigaction = unsafe { std::mem::zeroed() };
        unsafe {
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(libc::SIGALRM, &action, &mut previous_action);
        }

        // No timer for an unbounded scope; the handler alone supports the
        // manual cancel path.
        let previous_timer = timeout.map(|timeout| {
            let armed = libc::itimerval {
                // Zeroed interval keeps the timer one-shot.
                it_interval: libc::timeval {
                    tv_sec: 0,
                    tv_usec: 0,
                },
                it_value: timeval_from(timeout),
            };
            let mut previous: libc::itimerval = unsafe { std::mem::zeroed() };
            unsafe {
                libc::setitimer(libc::ITIMER_REAL, &armed, &mut previous);
            }
            previous
        });

        Self {
            previous_action,
            previous_timer,
        }
    }
}

impl Drop for SigalrmSlot {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        if let Some(previous) = self.previous_timer {
            unsafe {
                libc::setitimer(libc::ITIMER_REAL, &previous, std::ptr::null_mut());
            }
        }
        unsafe {
            libc::sigaction(libc::SIGALRM, &self.previous_action, std::ptr::null_mut());
        }
        ALARM_FIRED.store(false, Ordering::SeqCst);
    }
}

fn timeval_from(timeout: Duration) -> libc::timeval {
    let mut value = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::try_from(timeout.subsec_micros()).unwrap_or(0),
    };
    // A fully zero it_value disarms the timer instead of firing it; clamp a
    // zero timeout to one tick so an already-expired deadline still fires.
    if value.tv_sec == 0 && value.tv_usec == 0 {
        value.tv_usec = 1;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_refused_without_signal_capability() {
        let caps = Capabilities::new(false, true);
        let result = bound_alarm(Some(Duration::from_secs(1)), &caps);
        assert_eq!(result.err(), Some(InvalidEnforcerError));
    }

    #[test]
    fn test_unbounded_scope_completes() {
        let caps = Capabilities::new(true, true);
        let scope = bound_alarm(None, &caps).unwrap();
        let token = scope.token();
        assert!(token.deadline().is_none());

        let result = scope.run(|guard| {
            guard.checkpoint()?;
            Ok("done")
        });

        assert_eq!(result, Ok("done"));
        assert!(token.completed());
    }

    #[test]
    fn test_timeval_conversion_is_sub_second() {
        let value = timeval_from(Duration::from_millis(1500));
        assert_eq!(value.tv_sec, 1);
        assert_eq!(value.tv_usec, 500_000);
    }

    #[test]
    fn test_zero_timeout_still_arms() {
        let value = timeval_from(Duration::ZERO);
        assert_eq!(value.tv_sec, 0);
        assert_eq!(value.tv_usec, 1);
    }

    // SIGALRM disposition and ITIMER_REAL are process-global, so the tests
    // that actually fire the timer cannot run under the parallel harness.
    // Run them serially: cargo test -- --ignored --test-threads=1

    #[test]
    #[ignore]
    fn test_timer_fires_as_timeout() {
        let caps = Capabilities::new(true, true);
        let scope = bound_alarm(Some(Duration::from_millis(50)), &caps).unwrap();
        let token = scope.token();

        let result: Result<(), CancelError> = scope.run(|guard| {
            let give_up = Instant::now() + Duration::from_secs(10);
            while Instant::now() < give_up {
                guard.checkpoint()?;
                std::hint::spin_loop();
            }
            Ok(())
        });

        assert_eq!(result, Err(CancelError::Timeout));
        assert!(token.cancelled());
        assert!(!token.completed());
    }

    #[test]
    #[ignore]
    fn test_manual_cancel_is_cancelled_not_timeout() {
        let caps = Capabilities::new(true, true);
        let scope = bound_alarm(Some(Duration::from_secs(30)), &caps).unwrap();
        let token = scope.token();

        let result: Result<(), CancelError> = scope.run(|guard| {
            token.cancel();
            guard.checkpoint()?;
            Ok(())
        });

        assert_eq!(result, Err(CancelError::Cancelled));
        assert!(token.cancelled());
    }
}
