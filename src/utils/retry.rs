use crate::error::{ProcessingError, Result};
use crossbeam::channel::{self, RecvTimeoutError};
use serde::Deserialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Bounded timeout plus retries with exponential backoff for storage calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before attempt `attempt + 1` (attempts are 1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }

    /// Run a storage operation under the policy.
    ///
    /// Each attempt runs on a helper thread and is abandoned once the timeout
    /// elapses. Only transient errors are retried; the last transient error
    /// is surfaced as `StorageUnavailable`.
    pub fn run<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.retry(operation, || self.attempt(operation, Arc::clone(&f)))
    }

    /// Retry an operation on the calling thread, without a timeout.
    ///
    /// For operations that must never keep running after the caller gave up
    /// on them, such as partition swaps.
    pub fn run_in_place<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.retry(operation, f)
    }

    fn retry<T, F>(&self, operation: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match attempt_fn() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Storage operation failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.backoff(attempt));
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProcessingError::StorageUnavailable {
            operation: operation.to_string(),
            attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    fn attempt<T, F>(&self, operation: &str, f: Arc<F>) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        thread::Builder::new()
            .name(format!("storage-{}", operation))
            .spawn(move || {
                // The receiver is gone when the attempt timed out.
                let _ = tx.send(f());
            })?;

        match rx.recv_timeout(self.timeout()) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProcessingError::StorageTimeout {
                operation: operation.to_string(),
                timeout: self.timeout(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ProcessingError::StorageUnavailable {
                operation: operation.to_string(),
                attempts: 1,
                message: "storage worker exited without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            timeout_ms: 200,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = fast_policy()
            .run("get", move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "blip").into())
                } else {
                    Ok(42)
                }
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exhausted_retries_become_storage_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = fast_policy()
            .run::<(), _>("list", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessingError::StorageUnavailable { attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = fast_policy()
            .run::<(), _>("write", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProcessingError::InvalidFormat("bad".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, ProcessingError::InvalidFormat(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_in_place_retry_runs_on_caller() {
        let mut calls = 0;
        let caller = thread::current().id();

        let value = fast_policy()
            .run_in_place("write", || {
                calls += 1;
                assert_eq!(thread::current().id(), caller);
                if calls < 3 {
                    Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "busy").into())
                } else {
                    Ok("done")
                }
            })
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_slow_attempt_times_out() {
        let policy = RetryPolicy {
            max_attempts: 1,
            timeout_ms: 20,
            ..fast_policy()
        };

        let err = policy
            .run("get", || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, ProcessingError::StorageUnavailable { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
