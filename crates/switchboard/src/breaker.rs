//! Per-backend circuit breaker.
//!
//! Failures are counted over a sliding monitoring window. Once the count
//! reaches the threshold the circuit opens and requests fail fast without
//! touching the adapter. After the recovery timeout a single trial request
//! is let through; its outcome decides between closing again and reopening.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backends::errors::BackendError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub monitoring_window_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Ticket handed out by [`CircuitBreaker::admit`]. The caller must report
/// the outcome back with the same ticket so a half-open trial slot is
/// released exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    recent_failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    backend: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                recent_failures: VecDeque::new(),
                opened_at: None,
                half_open_successes: 0,
                trial_in_flight: false,
            }),
        }
    }

    /// Ask to send a request through this breaker.
    ///
    /// Returns a ticket when admitted. Fails with
    /// [`BackendError::CircuitOpen`] while the circuit is open or while
    /// another half-open trial is already in flight.
    pub async fn admit(&self) -> Result<Admission, BackendError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout() {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.trial_in_flight = true;
                    tracing::info!(backend = %self.backend, "circuit half-open, admitting trial");
                    Ok(Admission::Trial)
                } else {
                    Err(BackendError::CircuitOpen(self.backend.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BackendError::CircuitOpen(self.backend.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    pub async fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                if admission == Admission::Trial {
                    inner.trial_in_flight = false;
                }
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.recent_failures.clear();
                    inner.opened_at = None;
                    tracing::info!(backend = %self.backend, "circuit closed after recovery");
                }
            }
            CircuitState::Closed => {
                inner.recent_failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self, admission: Admission, error: &BackendError) {
        let mut inner = self.inner.lock().await;
        if admission == Admission::Trial {
            inner.trial_in_flight = false;
        }
        if !error.counts_toward_breaker() {
            return;
        }
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                tracing::warn!(backend = %self.backend, "trial failed, circuit reopened");
            }
            CircuitState::Closed => {
                let now = Instant::now();
                inner.recent_failures.push_back(now);
                let window = self.config.monitoring_window();
                while let Some(front) = inner.recent_failures.front() {
                    if now.duration_since(*front) > window {
                        inner.recent_failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.recent_failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    tracing::warn!(
                        backend = %self.backend,
                        failures = inner.recent_failures.len(),
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Whether the router should consider this backend at all. Half-open
    /// counts as routable since a trial may be admitted.
    pub async fn is_routable(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                elapsed >= self.config.recovery_timeout()
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

/// One breaker per configured backend, fixed at construction.
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, backends: impl IntoIterator<Item = String>) -> Self {
        let breakers = backends
            .into_iter()
            .map(|name| {
                let breaker = Arc::new(CircuitBreaker::new(name.clone(), config.clone()));
                (name, breaker)
            })
            .collect();
        Self { breakers }
    }

    pub fn get(&self, backend: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(backend).cloned()
    }
}
