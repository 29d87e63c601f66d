//! Bounded retry with exponential backoff and jitter.
//!
//! Retries stay on one backend; switching backends is the fallback
//! chain's job. Every attempt, including failed ones, is reported back to
//! the caller so traces and health counters see the full history.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backends::errors::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `next_attempt` (2-based; no delay precedes
    /// the first attempt). A rate-limit hint from the backend overrides
    /// the computed base, jitter is added on top either way.
    fn delay_before(&self, next_attempt: u32, hint: Option<Duration>) -> Duration {
        let base = match hint {
            Some(hint) => hint,
            None => {
                let exponent = next_attempt.saturating_sub(2);
                let ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent as i32);
                Duration::from_millis(ms as u64)
            }
        };
        if self.jitter_factor <= 0.0 {
            return base;
        }
        let spread = base.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=spread);
        base + Duration::from_secs_f64(jitter)
    }
}

/// One attempt against a backend, successful or not.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub number: u32,
    pub latency: Duration,
    pub error: Option<BackendError>,
}

/// The final result plus the per-attempt history that produced it.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, BackendError>,
    pub attempts: Vec<AttemptRecord>,
}

/// Run `op` up to `policy.max_attempts` times, backing off between
/// attempts. Stops early on success, on a non-retryable error, or when the
/// next backoff would overrun `deadline`.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, deadline: Instant, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::new();

    for attempt in 1..=max_attempts {
        let started = Instant::now();
        let result = op().await;
        let latency = started.elapsed();

        match result {
            Ok(value) => {
                attempts.push(AttemptRecord {
                    number: attempt,
                    latency,
                    error: None,
                });
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) => {
                attempts.push(AttemptRecord {
                    number: attempt,
                    latency,
                    error: Some(error.clone()),
                });
                if !error.is_retryable() || attempt == max_attempts {
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }

                let hint = match &error {
                    BackendError::RateLimited { retry_delay, .. } => *retry_delay,
                    _ => None,
                };
                let delay = policy.delay_before(attempt + 1, hint);
                if Instant::now() + delay >= deadline {
                    tracing::debug!(
                        attempt,
                        ?delay,
                        "backoff would overrun deadline, giving up on backend"
                    );
                    return RetryOutcome {
                        result: Err(error),
                        attempts,
                    };
                }
                tracing::debug!(attempt, ?delay, error = %error, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns from its final iteration")
}
