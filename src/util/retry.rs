//! Whole-operation retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay between the end of one attempt and the start of the next.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    /// Attempts actually made.
    pub attempts: u32,
    pub last_error: AuthError,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Execute an async operation with retry.
    ///
    /// `operation` receives the 1-based attempt number and must rebuild all of
    /// its state from scratch: nothing produced by a failed attempt is reused.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() || attempt >= max_attempts {
                        return Err(RetryFailure {
                            attempts: attempt,
                            last_error: e,
                        });
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );

                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
