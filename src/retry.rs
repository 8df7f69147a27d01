//! Retry policy for throttled generation calls.

use crate::error::LlmError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Pause between attempts. Injected so backoff timing can be observed in
/// tests without waiting.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Exponential backoff on rate-limit signals. Any other failure is returned
/// immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): initial, 2x, 4x, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Generation rate limited, retry {}/{} in {:?}",
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_rate_limited() => {
                    return Err(LlmError::RateLimited {
                        attempts: attempt + 1,
                    })
                }
                other => return other,
            }
        }
    }
}
