//! Routing: pick an ordered list of backend candidates for a request.
//!
//! Classification decides the tier, filtering removes backends that
//! cannot serve it right now, and a weighted composite score orders the
//! survivors. When a tier has no eligible backend the router degrades one
//! tier at a time before giving up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::BackendDescriptor;
use crate::breaker::BreakerRegistry;
use crate::classifier::{classify, ClassifierPolicy, ComplexityTier};
use crate::executor::EngineError;
use crate::health::HealthMonitor;
use crate::request::RequestContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterPolicy {
    pub priority_weight: f64,
    pub error_rate_weight: f64,
    pub latency_weight: f64,
    pub headroom_weight: f64,
    /// p95 latency at or under this scores full marks.
    pub latency_target_ms: u64,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            priority_weight: 0.30,
            error_rate_weight: 0.30,
            latency_weight: 0.20,
            headroom_weight: 0.20,
            latency_target_ms: 2_000,
        }
    }
}

/// The router's answer: which tier was served and in what order to try
/// backends.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub tier: ComplexityTier,
    /// Tier actually used to select candidates; differs from `tier` when
    /// the router degraded.
    pub served_tier: ComplexityTier,
    pub candidates: Vec<String>,
    pub degraded: bool,
}

pub struct RoutingEngine {
    descriptors: Vec<BackendDescriptor>,
    health: Arc<HealthMonitor>,
    breakers: Arc<BreakerRegistry>,
    policy: RouterPolicy,
    classifier: ClassifierPolicy,
}

impl RoutingEngine {
    pub fn new(
        descriptors: Vec<BackendDescriptor>,
        health: Arc<HealthMonitor>,
        breakers: Arc<BreakerRegistry>,
        policy: RouterPolicy,
        classifier: ClassifierPolicy,
    ) -> Self {
        Self {
            descriptors,
            health,
            breakers,
            policy,
            classifier,
        }
    }

    pub async fn route(&self, ctx: &RequestContext) -> Result<RoutingDecision, EngineError> {
        let tier = classify(ctx, &self.classifier);

        let mut served_tier = tier;
        loop {
            let candidates = self.candidates_for(served_tier).await;
            if !candidates.is_empty() {
                let degraded = served_tier != tier;
                if degraded {
                    tracing::warn!(
                        requested = %tier,
                        served = %served_tier,
                        "no eligible backend at requested tier, degrading"
                    );
                }
                return Ok(RoutingDecision {
                    tier,
                    served_tier,
                    candidates,
                    degraded,
                });
            }
            match served_tier.step_down() {
                Some(lower) => served_tier = lower,
                None => return Err(EngineError::NoEligibleBackend { tier }),
            }
        }
    }

    /// Eligible backends for a tier, best first.
    async fn candidates_for(&self, tier: ComplexityTier) -> Vec<String> {
        let mut scored: Vec<(f64, u32, String)> = Vec::new();
        let max_priority = self
            .descriptors
            .iter()
            .map(|d| d.priority)
            .max()
            .unwrap_or(1)
            .max(1);

        for descriptor in &self.descriptors {
            if !descriptor.supports(tier) {
                continue;
            }
            let routable = match self.breakers.get(&descriptor.name) {
                Some(breaker) => breaker.is_routable().await,
                None => false,
            };
            if !routable {
                continue;
            }
            if !self.health.has_capacity(&descriptor.name).await {
                continue;
            }

            let signals = self.health.signals(&descriptor.name).await;
            let priority_score = descriptor.priority as f64 / max_priority as f64;
            let error_score = 1.0 - signals.error_rate_short.clamp(0.0, 1.0);
            let latency_score = match signals.latency_p95 {
                Some(p95) if p95.as_millis() as u64 > self.policy.latency_target_ms => {
                    self.policy.latency_target_ms as f64 / p95.as_millis() as f64
                }
                _ => 1.0,
            };
            let score = self.policy.priority_weight * priority_score
                + self.policy.error_rate_weight * error_score
                + self.policy.latency_weight * latency_score
                + self.policy.headroom_weight * signals.quota_headroom;
            scored.push((score, descriptor.priority, descriptor.name.clone()));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });
        scored.into_iter().map(|(_, _, name)| name).collect()
    }
}
