//! Failure reporting for async operations.
//!
//! [`report_failure`] wraps a fallible future so its error is reported once
//! (to a log line, a metric, or both) and then handed back to the caller
//! untouched.  [`spawn_reported`] is the fire-and-forget variant for
//! background tasks whose errors have nowhere else to go.

use std::fmt::Display;
use std::future::Future;

// ---

use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// report_failure
// ---------------------------------------------------------------------------

/// Await `fut`; on error call `on_error` exactly once, then return the
/// original error.  Success values pass through without invoking the
/// callback.
pub async fn report_failure<T, E, F, R>(fut: F, on_error: R) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    R: FnOnce(&E),
{
    // ---
    match fut.await {
        Ok(value) => Ok(value),
        Err(e) => {
            on_error(&e);
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// spawn_reported
// ---------------------------------------------------------------------------

/// Spawn `fut` as a background task; an error is logged under `name`.
pub fn spawn_reported<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    // ---
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            tracing::error!(task = name, "background task failed: {e}");
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::cell::Cell;

    use lns_domain::LnsError;

    use super::*;

    #[tokio::test]
    async fn error_is_reported_once_and_returned_unchanged() {
        // ---
        let calls = Cell::new(0);
        let result: Result<(), LnsError> = report_failure(
            async { Err(LnsError::Resolver("cluster unavailable".into())) },
            |e| {
                calls.set(calls.get() + 1);
                assert!(matches!(e, LnsError::Resolver(_)));
            },
        )
        .await;

        assert_eq!(calls.get(), 1);
        match result {
            Err(LnsError::Resolver(msg)) => assert_eq!(msg, "cluster unavailable"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    // ---

    #[tokio::test]
    async fn success_skips_the_callback() {
        // ---
        let calls = Cell::new(0);
        let value = report_failure(async { Ok::<_, LnsError>(7u32) }, |_| {
            calls.set(calls.get() + 1)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.get(), 0);
    }

    // ---

    #[tokio::test]
    async fn spawned_failure_does_not_panic_the_task() {
        // ---
        let handle = spawn_reported("test", async { Err::<(), _>("boom") });
        handle.await.unwrap();
    }
}
