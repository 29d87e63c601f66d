//! The engine: classification, routing, resilience and tracing assembled
//! behind one `generate` call.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::backends::{self, Backend};
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::config::EngineConfig;
use crate::executor::{elapsed_ms, EngineError, FallbackExecutor};
use crate::health::{BackendHealth, HealthMonitor};
use crate::request::{GenerationRequest, GenerationResponse, RequestContext};
use crate::router::RoutingEngine;
use crate::trace::{Recorder, RequestTrace, TraceSink};

/// One backend's externally visible state: health plus circuit position.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    #[serde(flatten)]
    pub health: BackendHealth,
    pub circuit: CircuitState,
}

pub struct Engine {
    router: RoutingEngine,
    executor: FallbackExecutor,
    backends: Vec<Arc<dyn Backend>>,
    health: Arc<HealthMonitor>,
    breakers: Arc<BreakerRegistry>,
    recorder: Recorder,
    probe_interval: std::time::Duration,
}

impl Engine {
    /// Assemble an engine over already-built adapters.
    ///
    /// Adapters without usable configuration (no credentials, say) are
    /// dropped here with a warning rather than failing startup.
    pub fn new(config: EngineConfig, backends: Vec<Arc<dyn Backend>>) -> Result<Self> {
        config.validate()?;

        let backends: Vec<Arc<dyn Backend>> = backends
            .into_iter()
            .filter(|backend| {
                let available = backend.is_available();
                if !available {
                    tracing::warn!(
                        backend = backend.name(),
                        "backend not configured, excluding from routing"
                    );
                }
                available
            })
            .collect();

        let descriptors: Vec<_> = backends.iter().map(|b| b.descriptor().clone()).collect();
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();

        let health = Arc::new(HealthMonitor::new(config.health.clone(), &descriptors));
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone(), names));
        let router = RoutingEngine::new(
            descriptors,
            Arc::clone(&health),
            Arc::clone(&breakers),
            config.router.clone(),
            config.classifier.clone(),
        );
        let by_name: HashMap<String, Arc<dyn Backend>> = backends
            .iter()
            .map(|b| (b.name().to_string(), Arc::clone(b)))
            .collect();
        let executor = FallbackExecutor::new(
            by_name,
            Arc::clone(&breakers),
            Arc::clone(&health),
            config.retry.clone(),
        );

        Ok(Self {
            router,
            executor,
            backends,
            health,
            breakers,
            recorder: Recorder::log_only(),
            probe_interval: config.health.probe_interval(),
        })
    }

    /// Build adapters from configuration, then assemble.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let backends = backends::build(&config.backends)?;
        Self::new(config, backends)
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.recorder = Recorder::new(sink);
        self
    }

    /// Route one generation request through classification, candidate
    /// selection and the fallback chain. Exactly one trace is emitted
    /// whether the request succeeds or fails.
    #[tracing::instrument(skip_all)]
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, EngineError> {
        let ctx = RequestContext::new(request);

        let decision = match self.router.route(&ctx).await {
            Ok(decision) => decision,
            Err(error) => {
                let EngineError::NoEligibleBackend { tier } = &error else {
                    return Err(error);
                };
                let mut trace = RequestTrace::new(*tier);
                trace.outcome = error.kind().to_string();
                trace.total_latency_ms = elapsed_ms(ctx.started_at);
                self.recorder.emit(trace);
                return Err(error);
            }
        };
        tracing::debug!(
            tier = %decision.tier,
            served_tier = %decision.served_tier,
            candidates = ?decision.candidates,
            "routing decision"
        );

        match self.executor.run(&ctx, &decision.candidates).await {
            Ok(success) => {
                let total_latency_ms = elapsed_ms(ctx.started_at);
                let mut trace = RequestTrace::new(decision.tier);
                trace.outcome = "success".to_string();
                trace.backend_used = Some(success.backend.clone());
                trace.attempts = success.attempts.clone();
                trace.total_latency_ms = total_latency_ms;
                trace.usage = Some(success.response.usage);
                self.recorder.emit(trace);

                Ok(GenerationResponse {
                    content: success.response.content,
                    model: success.response.model,
                    backend_used: success.backend,
                    complexity_tier: decision.tier,
                    attempts: success.attempts,
                    total_latency_ms,
                    usage: success.response.usage,
                })
            }
            Err(error) => {
                let mut trace = RequestTrace::new(decision.tier);
                trace.outcome = error.kind().to_string();
                trace.attempts = error.attempts().to_vec();
                trace.total_latency_ms = elapsed_ms(ctx.started_at);
                self.recorder.emit(trace);
                Err(error)
            }
        }
    }

    /// Current per-backend state for operators.
    pub async fn status(&self) -> Vec<BackendStatus> {
        let mut out = Vec::new();
        for health in self.health.snapshot().await {
            let circuit = match self.breakers.get(&health.name) {
                Some(breaker) => breaker.state().await,
                None => CircuitState::Closed,
            };
            out.push(BackendStatus { health, circuit });
        }
        out
    }

    /// Probe every backend once and feed the results to the health
    /// monitor.
    pub async fn probe_all(&self) {
        let probes = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            async move {
                let ok = backend.probe().await.is_ok();
                (backend.name().to_string(), ok)
            }
        });
        for (name, ok) in futures::future::join_all(probes).await {
            self.health.record_probe(&name, ok).await;
        }
    }

    /// Background task probing backends on the configured interval.
    pub fn spawn_probe_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = self.probe_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.probe_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::errors::BackendError;
    use crate::backends::mock::MockBackend;
    use crate::classifier::ComplexityTier;
    use crate::trace::AttemptOutcome;

    fn engine_with(mocks: Vec<MockBackend>) -> Engine {
        let backends: Vec<Arc<dyn Backend>> = mocks
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Backend>)
            .collect();
        Engine::new(EngineConfig::default(), backends).unwrap()
    }

    #[tokio::test]
    async fn test_generate_end_to_end() {
        let engine = engine_with(vec![MockBackend::new("a")]);
        let response = engine
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.backend_used, "a");
        assert_eq!(response.complexity_tier, ComplexityTier::Low);
        assert_eq!(response.attempts.len(), 1);
        assert!(response.content.contains("a"));
    }

    #[tokio::test]
    async fn test_generate_falls_back_on_failure() {
        let engine = engine_with(vec![
            MockBackend::new("primary")
                .with_priority(20)
                .failing_with(BackendError::ServerError("500".into()), 10),
            MockBackend::new("fallback").with_priority(5),
        ]);
        let response = engine
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.backend_used, "fallback");
        assert!(response
            .attempts
            .iter()
            .any(|a| a.outcome == AttemptOutcome::Failure));
    }

    #[tokio::test]
    async fn test_no_backends_is_no_eligible_backend() {
        let engine = engine_with(vec![]);
        let err = engine
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoEligibleBackend { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_backends_are_excluded() {
        let engine = engine_with(vec![
            MockBackend::new("dead").unavailable().with_priority(50),
            MockBackend::new("alive"),
        ]);
        let response = engine
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.backend_used, "alive");
    }

    #[tokio::test]
    async fn test_status_reports_health_and_circuit() {
        let engine = engine_with(vec![
            MockBackend::new("a"),
            MockBackend::new("b"),
        ]);
        engine
            .generate(GenerationRequest::from_prompt("hi"))
            .await
            .unwrap();
        let status = engine.status().await;
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| s.circuit == CircuitState::Closed));
        let served = status.iter().find(|s| s.health.name == "a").unwrap();
        assert!(served.health.latency_p50_ms.is_some());
    }

    #[tokio::test]
    async fn test_status_serializes_flat() {
        let engine = engine_with(vec![MockBackend::new("a")]);
        let status = engine.status().await;
        let json = serde_json::to_value(&status[0]).unwrap();
        assert_eq!(json["name"], "a");
        assert_eq!(json["circuit"], "closed");
    }

    #[tokio::test]
    async fn test_probe_all_feeds_health() {
        let engine = engine_with(vec![MockBackend::new("a")]);
        engine.probe_all().await;
        let status = engine.status().await;
        assert_eq!(status[0].health.last_probe_ok, Some(true));
    }
}
