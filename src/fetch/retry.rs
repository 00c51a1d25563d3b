//! Bounded retry around one logical request
//!
//! `RetryEnvelope::execute` runs an attempt closure up to `max_retry` times. Each
//! attempt first waits for a permit (when a limiter is attached), then reports
//! whether it is done, should be retried, or failed in a way retrying cannot fix.
//! The same envelope serves full-body reads and streaming downloads: the attempt
//! decides what `T` is.

use crate::fetch::{FetchError, RateLimiter};
use std::future::Future;

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure; consumes one retry
    Retry(FetchError),
    /// Classified failure; returned as is
    Fail(FetchError),
}

/// Retry policy shared by both requesters
#[derive(Clone)]
pub struct RetryEnvelope {
    limiter: Option<RateLimiter>,
    max_retry: u32,
}

impl RetryEnvelope {
    pub fn new(limiter: Option<RateLimiter>, max_retry: u32) -> Self {
        Self {
            limiter,
            max_retry: max_retry.max(1),
        }
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// Runs `attempt(n)` for `n` in `0..max_retry` until it is done or fails
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - An attempt returned `Attempt::Done`
    /// * `Err(e)` - An attempt returned `Attempt::Fail(e)`
    /// * `Err(FetchError::MaxRetry)` - Every attempt asked for a retry
    pub async fn execute<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let mut last = None;

        for n in 0..self.max_retry {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            match attempt(n).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(e) => return Err(e),
                Attempt::Retry(e) => {
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        n + 1,
                        self.max_retry,
                        url,
                        e
                    );
                    last = Some(e);
                }
            }
        }

        Err(FetchError::MaxRetry {
            url: url.to_string(),
            attempts: self.max_retry,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            url: "http://x".to_string(),
            status: code,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let envelope = RetryEnvelope::new(None, 5);
        let calls = AtomicU32::new(0);

        let result = envelope
            .execute("http://x", |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Attempt::Retry(status(500))
                    } else {
                        Attempt::Done(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_max_retry() {
        let envelope = RetryEnvelope::new(None, 5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = envelope
            .execute("http://x", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Retry(status(502)) }
            })
            .await;

        match result {
            Err(FetchError::MaxRetry { attempts, last, .. }) => {
                assert_eq!(attempts, 5);
                assert!(last.contains("502"));
            }
            other => panic!("expected MaxRetry, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fail_is_not_retried() {
        let envelope = RetryEnvelope::new(None, 5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = envelope
            .execute("http://x", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Fail(FetchError::NeedLogin) }
            })
            .await;

        assert!(matches!(result, Err(FetchError::NeedLogin)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_retry_still_attempts_once() {
        assert_eq!(RetryEnvelope::new(None, 0).max_retry(), 1);
    }
}
