//! End-to-end scenarios across strategies and chaining.

use crate::clock::Clock;
use crate::coop::{bound_async_after, bound_async_at};
use crate::dispatch::{bound_sync_after, Capabilities};
use crate::errors::CancelError;
use crate::watcher::bound_watcher;
use std::time::{Duration, Instant};

/// Captures scope entry / terminal-state events in test output.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("timebound=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn async_scope_past_deadline_times_out() {
    init_logging();
    let deadline = Clock.deadline(Some(Duration::from_millis(100)));
    let scope = bound_async_at(deadline);
    let token = scope.token();

    let result = scope.run(tokio::time::sleep(Duration::from_secs(1))).await;

    assert_eq!(result, Err(CancelError::Timeout));
    assert!(token.cancelled());
    assert!(!token.completed());
}

#[tokio::test]
async fn async_scope_without_deadline_completes() {
    let scope = bound_async_at(None);
    let token = scope.token();

    let result = scope
        .run(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            "finished"
        })
        .await;

    assert_eq!(result, Ok("finished"));
    assert!(token.completed());
    assert!(!token.cancelled());
}

#[test]
fn watcher_scope_busy_loop_times_out_at_checkpoint() {
    init_logging();
    let handle = std::thread::spawn(|| {
        let scope = bound_watcher(Some(Duration::from_millis(100)));
        let token = scope.token();

        let result: Result<(), CancelError> = scope.run(|guard| {
            // Never yields; the fault surfaces at the checkpoint only.
            let give_up = Instant::now() + Duration::from_secs(10);
            while Instant::now() < give_up {
                guard.checkpoint()?;
                std::hint::spin_loop();
            }
            Ok(())
        });

        (result, token)
    });

    let (result, token) = handle.join().unwrap();
    assert_eq!(result, Err(CancelError::Timeout));
    assert!(token.cancelled());
    assert!(!token.completed());
}

#[tokio::test]
async fn manual_cancel_before_deadline_is_cancelled() {
    let scope = bound_async_after(Some(Duration::from_secs(30)));
    let token = scope.token();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let result = scope.run(tokio::time::sleep(Duration::from_secs(10))).await;
    canceller.await.unwrap();

    assert_eq!(result, Err(CancelError::Cancelled));
    assert!(token.cancelled());
}

#[tokio::test]
async fn outer_async_cancel_cascades_into_inner_watcher_scope() {
    let outer = bound_async_after(Some(Duration::from_secs(30)));
    let outer_token = outer.token();

    let inner = tokio::task::spawn_blocking({
        let outer_token = outer_token.clone();
        move || {
            let scope = bound_watcher(Some(Duration::from_secs(30)));
            outer_token.chain(&scope.token());

            scope.run(|guard| {
                let give_up = Instant::now() + Duration::from_secs(10);
                while Instant::now() < give_up {
                    guard.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    outer_token.mark_cancelled();

    // The inner token was cancelled by cascade, not by its own deadline.
    let result = inner.await.unwrap();
    assert_eq!(result, Err(CancelError::Cancelled));
}

#[test]
fn dispatcher_worker_thread_scope_times_out() {
    let handle = std::thread::spawn(|| {
        // A worker thread is never signal-capable.
        let caps = Capabilities::new(false, true);
        let scope = bound_sync_after(Some(Duration::from_millis(100)), &caps);
        assert_eq!(scope.strategy(), "watcher");
        let token = scope.token();

        let result: Result<(), CancelError> = scope.run(|guard| {
            let give_up = Instant::now() + Duration::from_secs(10);
            while Instant::now() < give_up {
                guard.checkpoint()?;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        (result, token)
    });

    let (result, token) = handle.join().unwrap();
    assert_eq!(result, Err(CancelError::Timeout));
    assert!(token.cancelled());
}

#[test]
fn unenforced_platform_runs_to_completion() {
    let caps = Capabilities::new(false, false);
    let scope = bound_sync_after(Some(Duration::from_millis(10)), &caps);
    let token = scope.token();

    let result = scope.run(|guard| {
        std::thread::sleep(Duration::from_millis(50));
        guard.checkpoint()?;
        Ok("ran unbounded")
    });

    assert_eq!(result, Ok("ran unbounded"));
    assert!(token.completed());
}

#[tokio::test]
async fn nested_async_scopes_inner_deadline_wins() {
    let outer = bound_async_after(Some(Duration::from_secs(30)));
    let outer_token = outer.token();

    let result = outer
        .run(async {
            let inner = bound_async_after(Some(Duration::from_millis(50)));
            outer_token.chain(&inner.token());
            inner.run(tokio::time::sleep(Duration::from_secs(10))).await
        })
        .await;

    // The inner scope timed out; the outer completed normally around it.
    assert_eq!(result, Ok(Err(CancelError::Timeout)));
}
