//! Retry with exponential backoff
//!
//! One policy type used for every retried call in the crate: node RPCs,
//! discovery metadata fetches and etcd connections. The attempt budget is
//! counted explicitly; elapsed time is not bounded.

use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `f` until it succeeds or the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(&self, op: &str, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_when(op, f, |_| true).await
    }

    /// Like [`run`](Self::run), but errors for which `transient` returns
    /// false are returned immediately.
    pub async fn run_when<T, E, F, Fut, P>(&self, op: &str, mut f: F, transient: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let transient = &transient;
        let mut attempt = 0u32;

        retry(self.backoff(), || {
            attempt += 1;
            let current = attempt;
            let fut = f();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if !transient(&e) => Err(backoff::Error::permanent(e)),
                    Err(e) if current >= max_attempts => {
                        warn!(op = %op, attempts = current, error = %e, "Giving up after retries");
                        Err(backoff::Error::permanent(e))
                    }
                    Err(e) => {
                        debug!(op = %op, attempt = current, error = %e, "Attempt failed, retrying");
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast()
            .run("always_fails", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast()
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("not yet".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast()
            .run_when(
                "permanent",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("not found".to_string()) }
                },
                |e| e != "not found",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_makes_single_attempt() {
        let calls = AtomicU32::new(0);
        let _: Result<(), String> = RetryPolicy::none()
            .run("once", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
