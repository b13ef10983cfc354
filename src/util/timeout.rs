//! Timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;

/// Smallest timeout any caller may configure.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Clamp a caller-supplied timeout so zero or tiny values cannot busy-loop.
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.max(MIN_TIMEOUT)
}

/// Wrap a future with a timeout, naming the stage that ran out of time.
pub async fn with_timeout<T>(
    stage: &str,
    duration: Duration,
    future: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::NetworkTimeout {
            stage: stage.to_string(),
            after_ms: duration.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_raises_zero_to_minimum() {
        assert_eq!(clamp_timeout(Duration::ZERO), MIN_TIMEOUT);
        assert_eq!(clamp_timeout(Duration::from_millis(300)), MIN_TIMEOUT);
        assert_eq!(clamp_timeout(Duration::from_secs(90)), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_names_stage() {
        let result: Result<(), AuthError> = with_timeout("platform", Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result.unwrap_err(),
            AuthError::NetworkTimeout {
                stage: "platform".into(),
                after_ms: 2000
            }
        );
    }
}
