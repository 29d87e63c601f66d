//! Fallback chain execution across an ordered candidate list.
//!
//! Each candidate gets a full retry sequence behind its circuit breaker
//! before the chain moves on. The breaker sees one verdict per candidate,
//! the final retry outcome; intermediate attempts only feed health
//! counters and the trace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::backends::errors::BackendError;
use crate::backends::Backend;
use crate::breaker::BreakerRegistry;
use crate::classifier::ComplexityTier;
use crate::health::HealthMonitor;
use crate::request::{BackendResponse, RequestContext};
use crate::retry::{self, RetryPolicy};
use crate::trace::AttemptTrace;

/// Terminal failure of a routed request.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Request deadline exceeded after {n} attempt(s)", n = .attempts.len())]
    Timeout { attempts: Vec<AttemptTrace> },

    #[error("All candidate backends exhausted after {n} attempt(s)", n = .attempts.len())]
    AllBackendsExhausted { attempts: Vec<AttemptTrace> },

    #[error("No eligible backend for tier '{tier}' or below")]
    NoEligibleBackend { tier: ComplexityTier },
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::AllBackendsExhausted { .. } => "all_backends_exhausted",
            Self::NoEligibleBackend { .. } => "no_eligible_backend",
        }
    }

    pub fn attempts(&self) -> &[AttemptTrace] {
        match self {
            Self::Timeout { attempts } | Self::AllBackendsExhausted { attempts } => attempts,
            Self::NoEligibleBackend { .. } => &[],
        }
    }
}

/// A chain run that produced a response.
#[derive(Debug)]
pub struct ChainSuccess {
    pub backend: String,
    pub response: BackendResponse,
    pub attempts: Vec<AttemptTrace>,
}

pub struct FallbackExecutor {
    backends: HashMap<String, Arc<dyn Backend>>,
    breakers: Arc<BreakerRegistry>,
    health: Arc<HealthMonitor>,
    retry: RetryPolicy,
}

impl FallbackExecutor {
    pub fn new(
        backends: HashMap<String, Arc<dyn Backend>>,
        breakers: Arc<BreakerRegistry>,
        health: Arc<HealthMonitor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backends,
            breakers,
            health,
            retry,
        }
    }

    /// Walk the candidate list until a backend produces a response.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        candidates: &[String],
    ) -> Result<ChainSuccess, EngineError> {
        let mut attempts: Vec<AttemptTrace> = Vec::new();

        for name in candidates {
            let Some(backend) = self.backends.get(name) else {
                tracing::warn!(backend = %name, "candidate has no registered adapter");
                continue;
            };
            if ctx.remaining().is_none() {
                tracing::warn!(backend = %name, "deadline exhausted before trying candidate");
                return Err(EngineError::Timeout { attempts });
            }

            let Some(breaker) = self.breakers.get(name) else {
                continue;
            };
            let admission = match breaker.admit().await {
                Ok(admission) => admission,
                Err(_) => {
                    // Raced an open circuit past the router's filter.
                    attempts.push(AttemptTrace::circuit_open(name, attempts.len() as u32 + 1));
                    continue;
                }
            };

            let backend = Arc::clone(backend);
            let outcome = retry::execute(&self.retry, ctx.deadline, || {
                let backend = Arc::clone(&backend);
                async move {
                    let budget = ctx
                        .remaining()
                        .ok_or(BackendError::Timeout(Duration::ZERO))?;
                    match tokio::time::timeout(budget, backend.invoke(ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(BackendError::Timeout(budget)),
                    }
                }
            })
            .await;

            for record in &outcome.attempts {
                self.health
                    .record_attempt(name, record.latency, record.error.is_some())
                    .await;
                let number = attempts.len() as u32 + 1;
                let latency_ms = record.latency.as_millis() as u64;
                attempts.push(match &record.error {
                    None => AttemptTrace::success(name, number, latency_ms),
                    Some(error) => AttemptTrace::failure(name, number, latency_ms, error),
                });
            }

            match outcome.result {
                Ok(response) => {
                    breaker.record_success(admission).await;
                    return Ok(ChainSuccess {
                        backend: name.clone(),
                        response,
                        attempts,
                    });
                }
                Err(error) => {
                    breaker.record_failure(admission, &error).await;
                    if matches!(error, BackendError::Timeout(_)) && ctx.remaining().is_none() {
                        return Err(EngineError::Timeout { attempts });
                    }
                    tracing::info!(
                        backend = %name,
                        error = %error,
                        "candidate failed, falling back to next"
                    );
                }
            }
        }

        Err(EngineError::AllBackendsExhausted { attempts })
    }
}

/// Shared helper for the engine's response assembly.
pub fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
