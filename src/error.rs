use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Classification of upstream failures.
///
/// `Retryable` covers timeouts and transient transport errors; only the
/// ratings enricher actually retries them. `Terminal` covers well-formed
/// rejections (4xx, "not found") and is never retried - callers degrade to
/// absent data instead. `Fatal` is reserved for configuration problems and
/// surfaces immediately at startup or first use.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("retryable upstream failure: {0}")]
    Retryable(String),
    #[error("terminal upstream failure: {0}")]
    Terminal(String),
    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::Terminal(_))
    }
}

/// Retry-with-backoff policy. Delay grows linearly: `base_delay * attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Runs `op`, retrying `Retryable` errors up to `max_attempts` total
    /// attempts. `Terminal` and `Fatal` errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.base_delay * attempt;
                    debug!(
                        "attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
