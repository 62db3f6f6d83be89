//! # Timebound
//!
//! Cooperative cancellation and deadline enforcement for bounded scopes.
//!
//! Timebound limits the wall-clock duration of a unit of work — async or
//! synchronous — and propagates cancellation through nested scopes. Three
//! strategies share one token state machine:
//!
//! - **Cooperative** ([`coop`]): races a future against the runtime timer;
//!   usable from any thread, cancellation lands at a suspension point
//! - **Alarm** ([`alarm`], unix): `SIGALRM` plus a one-shot interval timer;
//!   only valid on the signal-capable thread, but interrupts blocking
//!   syscalls
//! - **Watcher** ([`watcher`]): a supervising timer thread; works on any
//!   thread, faults surface at the scope's next checkpoint
//!
//! The [`dispatch`] module selects a sync strategy from explicit platform
//! capabilities and degrades to unenforced execution (with a warning) where
//! no mechanism exists.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use timebound::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scope = bound_async_after(Some(Duration::from_millis(10)));
//! let result = scope.run(tokio::time::sleep(Duration::from_secs(5))).await;
//! assert_eq!(result, Err(CancelError::Timeout));
//! # }
//! ```
//!
//! A caller wrapping work in a bounded scope handles exactly
//! [`CancelError::Timeout`] ("I was too slow") and
//! [`CancelError::Cancelled`] ("something else cancelled me") at the scope
//! boundary; every other error from the wrapped work propagates unchanged.
//!
//! [`CancelError::Timeout`]: errors::CancelError::Timeout
//! [`CancelError::Cancelled`]: errors::CancelError::Cancelled

#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

#[cfg(unix)]
pub mod alarm;
pub mod clock;
pub mod coop;
pub mod dispatch;
pub mod errors;
pub mod guard;
pub mod token;
pub mod watcher;

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(unix)]
    pub use crate::alarm::{bound_alarm, AlarmScope};
    pub use crate::clock::Clock;
    pub use crate::coop::{bound_async_after, bound_async_at, AsyncScope};
    pub use crate::dispatch::{
        bound_sync_after, bound_sync_at, Capabilities, SyncScope, UnenforcedScope,
    };
    pub use crate::errors::{CancelError, InvalidEnforcerError};
    pub use crate::guard::CancelGuard;
    pub use crate::token::CancelToken;
    pub use crate::watcher::{bound_watcher, WatcherScope};
}

#[cfg(test)]
mod integration_tests;
