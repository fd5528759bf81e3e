//! Bounded retries around storage calls

pub mod backoff;

use std::future::Future;

use tracing::warn;

use crate::error::StorageError;

pub use backoff::{BackoffPolicy, ExponentialBackoff};

/// Run `op` until it succeeds, fails permanently or `policy` is exhausted
///
/// Backoff state lives for this one call only. Non-transient errors are
/// returned as-is; exhaustion wraps the last error in
/// [`StorageError::Exhausted`].
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, operation: &'static str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut backoff = policy.start();

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };

        let Some(delay) = backoff.next_backoff() else {
            return Err(StorageError::Exhausted {
                operation,
                attempts: backoff.attempts(),
                source: Box::new(err),
            });
        };

        warn!(
            operation,
            attempt = backoff.attempts() - 1,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "storage call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_secs(1),
            max_attempts,
            max_elapsed: None,
            randomization_factor: 0.5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry(&quick_policy(5), "fetch", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StorageError::backend("connection reset"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&quick_policy(4), "persist status", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::backend("down"))
        })
        .await;

        match result {
            Err(StorageError::Exhausted { operation, attempts, .. }) => {
                assert_eq!(operation, "persist status");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&quick_policy(10), "fetch definition", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::NotFound("service 7".into()))
        })
        .await;

        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
