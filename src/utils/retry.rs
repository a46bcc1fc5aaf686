use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff Retry
// ============================================================================
//
// Used by the outbox relay for transient publish failures. The relay never
// gives up on a row permanently; a failed batch is retried on the next poll.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or `max_attempts` is exhausted,
/// sleeping with exponential backoff between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    tracing::error!(
                        attempt = attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return Err(error);
                }

                tracing::warn!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying after delay"
                );

                sleep(delay).await;
                delay = Duration::from_millis(
                    ((delay.as_millis() as f64) * config.multiplier) as u64,
                )
                .min(config.max_delay);
            }
        }
    }
}
