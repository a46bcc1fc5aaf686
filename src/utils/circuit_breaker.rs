use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker for the Event Transport
// ============================================================================
//
// Tracks publish failures and temporarily fails fast when the transport is
// unhealthy, so a dead broker never stalls request handling.
//
// States: Closed (normal), Open (failing fast), HalfOpen (probing recovery).
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub timeout: Duration,
    /// Successful probes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "Circuit breaker is open"),
            Self::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Run `operation` if the circuit allows it, recording the outcome.
    pub async fn guard<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.timeout {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                tracing::info!("Circuit breaker transitioning to half-open");
                inner.state = CircuitState::HalfOpen;
                inner.successes = 0;
            }
        }

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!(
                        successes = inner.successes,
                        "Circuit breaker closing after recovery"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;
        inner.opened_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failures >= self.config.failure_threshold {
                    tracing::warn!(failures = inner.failures, "Circuit breaker opening");
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Probe failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(50),
            success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        // While open, the operation is not even attempted.
        let result = cb.guard(async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_recovers_through_half_open() {
        let cb = CircuitBreaker::new(fast_config());

        for _ in 0..3 {
            let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Two successful probes close the circuit.
        assert!(cb.guard(async { Ok::<_, &str>(()) }).await.is_ok());
        assert!(cb.guard(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(fast_config());

        let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        assert!(cb.guard(async { Ok::<_, &str>(()) }).await.is_ok());

        // Two more failures are below the threshold again.
        let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        let _ = cb.guard(async { Err::<(), _>("boom") }).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
