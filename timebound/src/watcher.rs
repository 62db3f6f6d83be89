//! Watcher-thread enforcement for arbitrary worker threads.
//!
//! Spawns a daemon supervisor that sleeps for the scope's budget and, unless
//! stood down first, marks the token cancelled and deposits a fault for the
//! supervised closure to observe at its next checkpoint. Unlike the alarm
//! strategy this works on any thread, but it cannot interrupt a blocking
//! syscall; the fault only surfaces once the closure reaches a
//! [`CancelGuard::checkpoint`].

use crate::errors::CancelError;
use crate::guard::{CancelGuard, FaultSlot};
use crate::token::CancelToken;
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// A bounded scope supervised by a watcher thread.
pub struct WatcherScope {
    token: Arc<CancelToken>,
    slot: Arc<FaultSlot>,
    stand_down: Option<mpsc::Sender<()>>,
}

/// Bounds a synchronous scope on the current thread using a watcher thread.
///
/// No supervisor is spawned for a `None` timeout; the scope runs unbounded
/// and can only be cancelled manually or through chaining.
#[must_use]
pub fn bound_watcher(timeout: Option<Duration>) -> WatcherScope {
    let slot = Arc::new(FaultSlot::default());

    // The manual cancel path deposits the fault directly, without waiting
    // for the supervisor's timer. A dead slot means the scope already
    // exited; cancelling it is a caller bug, reported loudly.
    let cancel_slot = Arc::downgrade(&slot);
    let token = CancelToken::new(timeout, move || {
        inject_fault(&cancel_slot, CancelError::Cancelled);
    });

    let (stand_down, wait) = mpsc::channel();
    if let Some(timeout) = timeout {
        spawn_supervisor(Arc::clone(&token), Arc::clone(&slot), wait, timeout);
    }

    debug!(?timeout, "entered watcher based cancel scope");
    WatcherScope {
        token,
        slot,
        stand_down: Some(stand_down),
    }
}

fn spawn_supervisor(
    token: Arc<CancelToken>,
    slot: Arc<FaultSlot>,
    wait: mpsc::Receiver<()>,
    timeout: Duration,
) {
    let supervisor = thread::Builder::new()
        .name("timebound-watcher".to_string())
        .spawn(move || {
            match wait.recv_timeout(timeout) {
                // Stood down: the guarded work already exited.
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    // The watcher trusts its own timer and deposits a timeout
                    // fault directly; only completion strictly winning the
                    // race suppresses it.
                    if token.mark_cancelled() {
                        debug!("cancel fired for watcher based timeout");
                        slot.store(CancelError::Timeout);
                    }
                }
            }
        });

    if let Err(error) = supervisor {
        error!(%error, "failed to spawn watcher thread; timeout will not be enforced");
    }
}

fn inject_fault(slot: &Weak<FaultSlot>, fault: CancelError) {
    match slot.upgrade() {
        Some(slot) => slot.store(fault),
        None => error!("cancel requested for a watcher scope that already exited"),
    }
}

impl WatcherScope {
    /// The token guarding this scope.
    #[must_use]
    pub fn token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.token)
    }

    /// Runs `work` inside the bounded scope on the current thread.
    ///
    /// `work` observes cancellation through the guard's checkpoints; scope
    /// exit is the final checkpoint, so a fault that fired during the last
    /// stretch of work still surfaces. On a clean exit the supervisor is
    /// stood down and the token marked completed.
    pub fn run<T>(
        mut self,
        work: impl FnOnce(&CancelGuard) -> Result<T, CancelError>,
    ) -> Result<T, CancelError> {
        let guard = CancelGuard::new(Arc::clone(&self.token), Arc::clone(&self.slot));
        let result = work(&guard);

        // Stand the supervisor down before deciding the terminal state so it
        // cannot fire against a scope that is in its exit path.
        if let Some(stand_down) = self.stand_down.take() {
            let _ = stand_down.send(());
        }

        let value = result?;
        guard.checkpoint()?;

        if self.token.mark_completed() {
            Ok(value)
        } else {
            // The supervisor won the race against our final checkpoint.
            Err(self
                .slot
                .get()
                .unwrap_or_else(|| CancelError::classify(self.token.deadline())))
        }
    }
}

impl std::fmt::Debug for WatcherScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherScope")
            .field("token", &self.token)
            .finish()
    }
}
