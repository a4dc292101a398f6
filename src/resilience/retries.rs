//! Retry loop for idempotent upstream calls.

use std::future::Future;

use crate::resilience::backoff::calculate_backoff;

/// Retry settings for a single call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted.
pub async fn with_retries<T, E, F, Fut, R>(policy: RetryPolicy, is_retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts < max_attempts && is_retryable(&e) => {
                let delay = calculate_backoff(attempts, policy.base_delay_ms, policy.max_delay_ms);
                tracing::info!(attempt = attempts, delay = ?delay, error = %e, "Retrying upstream request");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retries(policy(3), |_| true, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("refused".to_string()) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retries(policy(5), |_| false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("404".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retries(policy(2), |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("reset".to_string())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
