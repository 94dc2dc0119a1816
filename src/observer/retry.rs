use std::future::Future;
use std::time::Duration;

use crate::utils::{AdminError, ObserverError};

/// Fixed-count, fixed-delay retry budget for read-only calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay_ms: u64) -> Self {
        Self {
            retries,
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent
    pub async fn run<T, F, Fut>(&self, resource: &str, mut op: F) -> Result<T, ObserverError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdminError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts() => {
                    tracing::debug!(resource, attempt, error = %err, "transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    return Err(ObserverError {
                        resource: resource.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }
}
