//! Bounded exponential-backoff retry executor.
//!
//! Every external call (flight-data provider, messaging gateway, database)
//! goes through [`run_with_retry`] with one of the per-service policies.
//! Failures are classified up front as `Retryable` or `Terminal`; control
//! flow never relies on panics or bare errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

/// Retry behavior for one class of external service.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Flight-data provider: slow upstream, generous backoff.
    pub const fn flight_data() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Messaging gateway: user-facing, keep it short.
    pub const fn messaging() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
            jitter: true,
        }
    }

    /// Database round-trips: predictable, no jitter.
    pub const fn database() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: false,
        }
    }

    /// Backoff before retry number `retry` (1-based):
    /// `min(base * factor^(retry-1), cap)`, multiplied by `U(0.5, 1.5)`
    /// when jitter is on.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(exp);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }
}

/// Two-level operation failure: retryable errors go back through the
/// policy, terminal errors abort immediately.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("retryable: {0}")]
    Retryable(anyhow::Error),

    #[error("terminal: {0}")]
    Terminal(anyhow::Error),
}

impl OpError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        OpError::Retryable(err.into())
    }

    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        OpError::Terminal(err.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, OpError::Retryable(_))
    }

    /// Classify an HTTP response status: 429 and 5xx retry, other 4xx are
    /// terminal.
    pub fn from_http_status(status: u16, message: String) -> Self {
        if http_status_is_retryable(status) {
            OpError::Retryable(anyhow::anyhow!("HTTP {}: {}", status, message))
        } else {
            OpError::Terminal(anyhow::anyhow!("HTTP {}: {}", status, message))
        }
    }
}

/// 429, 500, 502, 503, 504 (and the rest of the 5xx family) retry;
/// everything else in 4xx is a caller bug and terminal.
pub fn http_status_is_retryable(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Successful result plus how many attempts it took, so callers can
/// record `retry_count`.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Run `op` under `policy`, sleeping between retryable failures.
pub async fn run_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    context: &str,
    mut op: F,
) -> Result<RetryOutcome<T>, OpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OpError>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(context, attempt, "operation succeeded after retry");
                }
                return Ok(RetryOutcome { value, attempts: attempt });
            }
            Err(OpError::Terminal(err)) => {
                error!(context, attempt, error = %err, "terminal error, not retrying");
                return Err(OpError::Terminal(err));
            }
            Err(OpError::Retryable(err)) => {
                if attempt >= policy.max_attempts {
                    error!(
                        context,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(OpError::Retryable(err));
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    context,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
