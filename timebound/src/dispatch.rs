//! Strategy selection for synchronously scheduled scopes.
//!
//! Picks alarm, watcher, or unenforced execution from the capabilities the
//! caller passes in. Capabilities are an explicit value rather than an
//! ambient thread-registry lookup so the selection is pure and testable;
//! [`Capabilities::detect`] probes the real platform for production use.
//!
//! Cooperative scopes never go through here: [`crate::coop`] works on any
//! thread and any platform.

use crate::clock::Clock;
use crate::errors::CancelError;
use crate::guard::{CancelGuard, FaultSlot};
use crate::token::CancelToken;
use crate::watcher::{bound_watcher, WatcherScope};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(unix)]
use crate::alarm::AlarmScope;

/// What the host environment permits this call site to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    signal_capable: bool,
    enforcement_supported: bool,
}

impl Capabilities {
    /// Builds capabilities explicitly; used by tests and by hosts that
    /// manage signal ownership themselves.
    #[must_use]
    pub const fn new(signal_capable: bool, enforcement_supported: bool) -> Self {
        Self {
            signal_capable,
            enforcement_supported,
        }
    }

    /// Probes the current platform and thread.
    ///
    /// On unix the calling thread is signal-capable when it is the process
    /// main thread. Elsewhere neither signal timers nor watcher faults are
    /// supported and sync scopes run unenforced.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            signal_capable: is_main_thread(),
            enforcement_supported: cfg!(unix),
        }
    }

    /// Whether the caller may install process-wide signal handlers.
    #[must_use]
    pub const fn signal_capable(self) -> bool {
        self.signal_capable
    }

    /// Whether any sync enforcement mechanism exists on this platform.
    #[must_use]
    pub const fn enforcement_supported(self) -> bool {
        self.enforcement_supported
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn is_main_thread() -> bool {
    unsafe { libc::syscall(libc::SYS_gettid) == libc::c_long::from(libc::getpid()) }
}

#[cfg(target_os = "macos")]
#[allow(unsafe_code)]
fn is_main_thread() -> bool {
    unsafe { libc::pthread_main_np() != 0 }
}

// Without a reliable probe, fall back to the watcher strategy.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn is_main_thread() -> bool {
    false
}

/// A synchronous bounded scope with the strategy chosen by the dispatcher.
pub enum SyncScope {
    /// Signal-capable thread: `SIGALRM` plus interval timer.
    #[cfg(unix)]
    Alarm(AlarmScope),
    /// Any other thread: supervising watcher thread.
    Watcher(WatcherScope),
    /// Platform cannot enforce timeouts; the scope runs unbounded.
    Unenforced(UnenforcedScope),
}

/// Bounds a synchronous scope on the current thread by a relative timeout.
///
/// Strategy selection: unenforced when the platform supports no enforcement
/// (logged as a warning when a timeout was actually requested), alarm when
/// the caller is signal-capable, watcher otherwise.
#[must_use]
pub fn bound_sync_after(timeout: Option<Duration>, caps: &Capabilities) -> SyncScope {
    if !caps.enforcement_supported() {
        if let Some(timeout) = timeout {
            warn!(
                ?timeout,
                "entered cancel scope on a platform without enforcement; timeout will not be enforced"
            );
        }
        return SyncScope::Unenforced(UnenforcedScope::new());
    }

    #[cfg(unix)]
    if caps.signal_capable() {
        return SyncScope::Alarm(AlarmScope::enter(timeout));
    }

    SyncScope::Watcher(bound_watcher(timeout))
}

/// Bounds a synchronous scope on the current thread by an absolute deadline.
///
/// Computes the remaining budget and delegates to [`bound_sync_after`].
#[must_use]
pub fn bound_sync_at(deadline: Option<Instant>, caps: &Capabilities) -> SyncScope {
    bound_sync_after(Clock.remaining(deadline), caps)
}

impl SyncScope {
    /// The token guarding this scope.
    #[must_use]
    pub fn token(&self) -> Arc<CancelToken> {
        match self {
            #[cfg(unix)]
            Self::Alarm(scope) => scope.token(),
            Self::Watcher(scope) => scope.token(),
            Self::Unenforced(scope) => scope.token(),
        }
    }

    /// The name of the selected strategy, for diagnostics.
    #[must_use]
    pub fn strategy(&self) -> &'static str {
        match self {
            #[cfg(unix)]
            Self::Alarm(_) => "alarm",
            Self::Watcher(_) => "watcher",
            Self::Unenforced(_) => "unenforced",
        }
    }

    /// Runs `work` inside the bounded scope on the current thread.
    pub fn run<T>(
        self,
        work: impl FnOnce(&CancelGuard) -> Result<T, CancelError>,
    ) -> Result<T, CancelError> {
        match self {
            #[cfg(unix)]
            Self::Alarm(scope) => scope.run(work),
            Self::Watcher(scope) => scope.run(work),
            Self::Unenforced(scope) => scope.run(work),
        }
    }
}

impl std::fmt::Debug for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScope")
            .field("strategy", &self.strategy())
            .field("token", &self.token())
            .finish()
    }
}

/// A scope with no enforcement mechanism behind it.
///
/// The token is never cancelled by a timer, only manually or by cascade;
/// checkpoints still observe those.
pub struct UnenforcedScope {
    token: Arc<CancelToken>,
}

impl UnenforcedScope {
    fn new() -> Self {
        debug!("entered unenforced cancel scope");
        Self {
            token: CancelToken::unenforced(),
        }
    }

    /// The token guarding this scope.
    #[must_use]
    pub fn token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.token)
    }

    /// Runs `work` with checkpoints that only observe manual cancellation.
    pub fn run<T>(
        self,
        work: impl FnOnce(&CancelGuard) -> Result<T, CancelError>,
    ) -> Result<T, CancelError> {
        let guard = CancelGuard::new(Arc::clone(&self.token), Arc::new(FaultSlot::default()));
        let value = work(&guard)?;
        guard.checkpoint()?;
        self.token.mark_completed();
        Ok(value)
    }
}

impl std::fmt::Debug for UnenforcedScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnenforcedScope")
            .field("token", &self.token)
            .finish()
    }
}
