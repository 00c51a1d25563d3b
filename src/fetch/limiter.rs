//! Shared permit source
//!
//! A background task emits one permit, then sleeps `interval + rand(0..=jitter)`,
//! forever. Every caller of one platform shares the same receiver, so the total
//! outbound rate is bounded no matter how many jobs or sources are active.
//! Waiting for a permit has no timeout.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Cloneable handle to one platform's permit stream
#[derive(Clone)]
pub struct RateLimiter {
    permits: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl RateLimiter {
    /// Starts the permit generator on the current runtime
    pub fn spawn(interval: Duration, jitter: Duration) -> Self {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                if tx.send(()).await.is_err() {
                    // every handle was dropped
                    break;
                }
                tokio::time::sleep(next_delay(interval, jitter)).await;
            }
        });

        Self {
            permits: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits for the next permit
    pub async fn acquire(&self) {
        let mut permits = self.permits.lock().await;
        // None only if the generator task died with the runtime
        let _ = permits.recv().await;
    }
}

fn next_delay(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_next_delay_bounds() {
        let interval = Duration::from_millis(100);
        let jitter = Duration::from_millis(50);

        for _ in 0..100 {
            let delay = next_delay(interval, jitter);
            assert!(delay >= interval);
            assert!(delay <= interval + jitter);
        }
        assert_eq!(next_delay(interval, Duration::ZERO), interval);
    }

    #[tokio::test]
    async fn test_permits_are_spaced() {
        let limiter = RateLimiter::spawn(Duration::from_millis(40), Duration::ZERO);
        // first permit is emitted immediately
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_permits() {
        let limiter = RateLimiter::spawn(Duration::from_millis(30), Duration::ZERO);
        let start = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // four permits need at least three intervals
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
