//! Exponential backoff around generative calls

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::OrchestrationError;
use crate::Result;

/// Injectable sleep so backoff can be observed without waiting.
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

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^attempt`, attempt counted from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds, fails non-retriably, or retries run out.
///
/// `op` receives the zero-based attempt number. Cancellation is observed
/// before each attempt and during each backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying generative call");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                    _ = sleeper.sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
