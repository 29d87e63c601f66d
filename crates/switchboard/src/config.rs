//! Configuration surface consumed at process start.
//!
//! Ownership of where these values come from (files, env, a control
//! plane) belongs to an external collaborator; this module only defines
//! the shapes, their defaults and a JSON loading convenience used by
//! tests and simple deployments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backends::BackendDescriptor;
use crate::breaker::BreakerConfig;
use crate::classifier::{ClassifierPolicy, ComplexityTier};
use crate::health::HealthConfig;
use crate::retry::RetryPolicy;
use crate::router::RouterPolicy;

/// Which concrete adapter serves a configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name, used as the registry key everywhere.
    pub name: String,
    pub kind: BackendKind,
    pub model: String,
    /// Override for the adapter's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key, if the kind needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "ComplexityTier::all")]
    pub tiers: Vec<ComplexityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u64>,
    #[serde(default = "default_cost_factor")]
    pub cost_factor: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_priority() -> u32 {
    10
}

fn default_cost_factor() -> f64 {
    1.0
}

fn default_timeout_secs() -> u64 {
    600
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, kind: BackendKind, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            model: model.into(),
            base_url: None,
            api_key_env: None,
            priority: default_priority(),
            tiers: ComplexityTier::all(),
            requests_per_minute: None,
            requests_per_day: None,
            cost_factor: default_cost_factor(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<ComplexityTier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn with_rate_limits(
        mut self,
        requests_per_minute: Option<u64>,
        requests_per_day: Option<u64>,
    ) -> Self {
        self.requests_per_minute = requests_per_minute;
        self.requests_per_day = requests_per_day;
        self
    }

    pub fn with_cost_factor(mut self, cost_factor: f64) -> Self {
        self.cost_factor = cost_factor;
        self
    }

    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            name: self.name.clone(),
            priority: self.priority,
            supported_tiers: self.tiers.clone(),
            requests_per_minute: self.requests_per_minute,
            requests_per_day: self.requests_per_day,
            cost_factor: self.cost_factor,
        }
    }
}

/// Everything the engine needs at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub router: RouterPolicy,
    #[serde(default)]
    pub classifier: ClassifierPolicy,
    #[serde(default)]
    pub health: HealthConfig,
}

impl EngineConfig {
    pub fn new(backends: Vec<BackendConfig>) -> Self {
        Self {
            backends,
            ..Self::default()
        }
    }

    /// Load from a JSON file.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid engine config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.name.is_empty() {
                anyhow::bail!("backend name cannot be empty");
            }
            if !seen.insert(backend.name.as_str()) {
                anyhow::bail!("duplicate backend name '{}'", backend.name);
            }
            if backend.tiers.is_empty() {
                anyhow::bail!("backend '{}' supports no complexity tiers", backend.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_builders() {
        let config = BackendConfig::new("claude-main", BackendKind::Anthropic, "claude-sonnet-4-5")
            .with_api_key_env("ANTHROPIC_API_KEY")
            .with_priority(30)
            .with_tiers(vec![ComplexityTier::High])
            .with_rate_limits(Some(60), Some(5_000));

        assert_eq!(config.priority, 30);
        let descriptor = config.descriptor();
        assert!(descriptor.supports(ComplexityTier::High));
        assert!(!descriptor.supports(ComplexityTier::Low));
        assert_eq!(descriptor.requests_per_minute, Some(60));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::new(vec![BackendConfig::new(
            "local",
            BackendKind::Ollama,
            "qwen2.5",
        )]);
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.backends.len(), 1);
        assert_eq!(parsed.backends[0].kind, BackendKind::Ollama);
    }

    #[test]
    fn test_minimal_json_applies_defaults() {
        let parsed: EngineConfig = serde_json::from_str(
            r#"{"backends": [{"name": "a", "kind": "open_ai", "model": "gpt-4o"}]}"#,
        )
        .unwrap();
        let backend = &parsed.backends[0];
        assert_eq!(backend.priority, 10);
        assert_eq!(backend.tiers.len(), 3);
        assert!((backend.cost_factor - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.json");
        let config = EngineConfig::new(vec![BackendConfig::new(
            "local",
            BackendKind::Ollama,
            "qwen2.5",
        )]);
        tokio::fs::write(&path, serde_json::to_string_pretty(&config).unwrap())
            .await
            .unwrap();

        let loaded = EngineConfig::load(&path).await.unwrap();
        assert_eq!(loaded.backends[0].name, "local");
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.json");
        tokio::fs::write(
            &path,
            r#"{"backends": [
                {"name": "a", "kind": "ollama", "model": "m"},
                {"name": "a", "kind": "open_ai", "model": "m"}
            ]}"#,
        )
        .await
        .unwrap();

        assert!(EngineConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = EngineConfig::new(vec![
            BackendConfig::new("a", BackendKind::Ollama, "m"),
            BackendConfig::new("a", BackendKind::OpenAi, "m"),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_tiers() {
        let config = EngineConfig::new(vec![
            BackendConfig::new("a", BackendKind::Ollama, "m").with_tiers(vec![]),
        ]);
        assert!(config.validate().is_err());
    }
}
