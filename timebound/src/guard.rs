//! Cancellation checkpoints for synchronously scheduled scopes.
//!
//! Signal handlers and supervisor threads cannot safely unwind another
//! thread's stack, so the sync enforcers deliver their fault through a shared
//! slot instead: the guarded closure observes cancellation by calling
//! [`CancelGuard::checkpoint`] at its own safe points. The contract is "the
//! fault is observed at the next checkpoint", not "the fault interrupts
//! arbitrary machine state". Scope exit counts as a final checkpoint.

use crate::errors::CancelError;
use crate::token::CancelToken;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Slot an enforcer deposits a fault into for the guarded closure to pick up.
#[derive(Default)]
pub(crate) struct FaultSlot {
    fault: Mutex<Option<CancelError>>,
}

impl FaultSlot {
    /// Deposits a fault. The first fault wins; later deposits are ignored.
    pub(crate) fn store(&self, fault: CancelError) {
        let mut slot = self.fault.lock();
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    pub(crate) fn get(&self) -> Option<CancelError> {
        *self.fault.lock()
    }
}

/// Handed to a guarded closure so it can observe cancellation.
///
/// The closure should call [`checkpoint`](Self::checkpoint) at its safe
/// points, typically with `?` so the fault propagates out of the scope.
pub struct CancelGuard {
    token: Arc<CancelToken>,
    slot: Arc<FaultSlot>,
    /// Set by the alarm signal handler; translated into token state here
    /// because signal handlers may only touch atomics.
    alarm_fired: Option<&'static AtomicBool>,
}

impl CancelGuard {
    pub(crate) fn new(token: Arc<CancelToken>, slot: Arc<FaultSlot>) -> Self {
        Self {
            token,
            slot,
            alarm_fired: None,
        }
    }

    pub(crate) fn with_alarm_flag(
        token: Arc<CancelToken>,
        slot: Arc<FaultSlot>,
        alarm_fired: &'static AtomicBool,
    ) -> Self {
        Self {
            token,
            slot,
            alarm_fired: Some(alarm_fired),
        }
    }

    /// The token guarding this scope, for chaining or manual cancellation.
    #[must_use]
    pub fn token(&self) -> &Arc<CancelToken> {
        &self.token
    }

    /// Returns whether a fault is pending without consuming it.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.pending_alarm();
        self.slot.get().is_some() || self.token.cancelled()
    }

    /// Observation point for cancellation.
    ///
    /// Returns the pending fault if the enforcer fired or the token was
    /// cancelled, `Ok(())` otherwise. The fault is classified against the
    /// clock at this moment, per the best-effort rule described on
    /// [`CancelError::classify`].
    pub fn checkpoint(&self) -> Result<(), CancelError> {
        self.pending_alarm();

        if let Some(fault) = self.slot.get() {
            return Err(fault);
        }
        if self.token.cancelled() {
            return Err(CancelError::classify(self.token.deadline()));
        }

        Ok(())
    }

    /// Translates a fired alarm signal into token state and a deposited fault.
    fn pending_alarm(&self) {
        if let Some(fired) = self.alarm_fired {
            if fired.load(Ordering::SeqCst) {
                self.token.mark_cancelled();
                self.slot.store(CancelError::classify(self.token.deadline()));
            }
        }
    }
}

impl std::fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelGuard")
            .field("token", &self.token)
            .field("pending_fault", &self.slot.get())
            .finish()
    }
}
