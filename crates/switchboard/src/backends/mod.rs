//! Backend adapters: one uniform contract over heterogeneous remote
//! generation services.
//!
//! Adapters normalize requests, responses and errors; they never retry,
//! never sleep and never consult health state. Resilience is layered on
//! top by the retry executor, circuit breaker and fallback chain.

pub mod anthropic;
pub mod api_client;
pub mod errors;
pub mod ollama;
pub mod openai;

#[cfg(test)]
pub mod mock;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::classifier::ComplexityTier;
use crate::config::{BackendConfig, BackendKind};
use crate::request::{BackendResponse, RequestContext};
use errors::BackendError;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Immutable identity and capability metadata for one backend.
///
/// Built from configuration at process start; never mutated afterwards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    /// Higher wins ties and contributes to the routing score.
    pub priority: u32,
    pub supported_tiers: Vec<ComplexityTier>,
    pub requests_per_minute: Option<u64>,
    pub requests_per_day: Option<u64>,
    /// Relative cost of this backend, 1.0 = baseline.
    pub cost_factor: f64,
}

impl BackendDescriptor {
    pub fn supports(&self, tier: ComplexityTier) -> bool {
        self.supported_tiers.contains(&tier)
    }
}

/// Uniform capability contract over a remote generation service.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn descriptor(&self) -> &BackendDescriptor;

    /// Whether configuration and credentials are present. Cheap; no I/O.
    fn is_available(&self) -> bool;

    /// Perform the remote call. Exactly one attempt — no internal retry.
    async fn invoke(&self, ctx: &RequestContext) -> Result<BackendResponse, BackendError>;

    /// Lightweight liveness check used by the health monitor's active
    /// probing, independent of real traffic.
    async fn probe(&self) -> Result<(), BackendError>;
}

/// Build adapters from configuration.
///
/// The set of backend kinds is closed: each variant maps to a concrete
/// adapter, resolved here at startup rather than through runtime
/// registration.
pub fn build(configs: &[BackendConfig]) -> Result<Vec<Arc<dyn Backend>>> {
    let mut backends: Vec<Arc<dyn Backend>> = Vec::with_capacity(configs.len());
    for config in configs {
        let backend: Arc<dyn Backend> = match config.kind {
            BackendKind::OpenAi => Arc::new(OpenAiBackend::from_config(config)?),
            BackendKind::Anthropic => Arc::new(AnthropicBackend::from_config(config)?),
            BackendKind::Ollama => Arc::new(OllamaBackend::from_config(config)?),
        };
        backends.push(backend);
    }
    Ok(backends)
}

/// Resolve an API key from the environment variable a config names.
pub(crate) fn resolve_api_key(config: &BackendConfig) -> Option<String> {
    config
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|key| !key.is_empty())
}
