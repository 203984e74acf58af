// File: src/retry.rs

//! Retry-with-backoff policy for calls that cross into the node.
//!
//! The policy is deliberately small: a number of attempts, a base delay and a
//! predicate deciding which failures are worth retrying. The delay before
//! retry `n` (zero-based) is `base_delay * 2^n`, with no jitter and no cap.

use crate::config::RetrySettings;
use crate::errors::ClientError;
use crate::metrics::RPC_RETRIES_COUNTER;
use futures::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub is_transient: fn(&ClientError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            is_transient: ClientError::is_transient,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            is_transient: ClientError::is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_classifier(mut self, is_transient: fn(&ClientError) -> bool) -> Self {
        self.is_transient = is_transient;
        self
    }

    /// Delay before the retry following failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub async fn run<F, Fut, T>(&self, operation: &str, call_fn: F) -> Result<T, ClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match call_fn().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "RPC call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !(self.is_transient)(&e) || attempt + 1 >= attempts {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "RPC rate limit hit, retrying with backoff"
                    );
                    RPC_RETRIES_COUNTER.with_label_values(&[operation]).inc();

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rate_limited() -> ClientError {
        ClientError::Rpc {
            code: -32002,
            message: "too many errors".into(),
            data: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_with_exponential_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = policy
            .run("streamCount", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(rate_limited())
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // base + base * 2
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_returned_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("getStream", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Validation("bad input".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("balanceOf", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(ClientError::Transport(format!("attempt {}", n)))
                }
            })
            .await;

        match result {
            Err(ClientError::Transport(msg)) => assert_eq!(msg, "attempt 2"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(4, Duration::from_millis(2000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(8000));
    }
}
