//! Ollama local-model adapter, speaking the OpenAI-compatible surface.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::api_client::{ApiClient, AuthMethod};
use super::errors::BackendError;
use super::{Backend, BackendDescriptor};
use crate::config::BackendConfig;
use crate::request::{BackendResponse, RequestContext, TokenUsage};

pub const OLLAMA_DEFAULT_HOST: &str = "localhost";
pub const OLLAMA_DEFAULT_PORT: u16 = 11434;
const COMPLETIONS_PATH: &str = "v1/chat/completions";
const TAGS_PATH: &str = "api/tags";

pub struct OllamaBackend {
    client: ApiClient,
    descriptor: BackendDescriptor,
    model: String,
}

/// OLLAMA hosts are often configured as bare `host` or `host:port`.
fn normalize_base_url(raw: &str) -> String {
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };
    match url::Url::parse(&with_scheme) {
        Ok(parsed) if parsed.port().is_none() && parsed.port_or_known_default() != Some(443) => {
            format!("{}:{}", with_scheme.trim_end_matches('/'), OLLAMA_DEFAULT_PORT)
        }
        _ => with_scheme,
    }
}

impl OllamaBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let base_url = normalize_base_url(
            config
                .base_url
                .as_deref()
                .unwrap_or(OLLAMA_DEFAULT_HOST),
        );
        let client = ApiClient::new(
            &base_url,
            AuthMethod::None,
            Duration::from_secs(config.timeout_secs),
        )?;

        Ok(Self {
            client,
            descriptor: config.descriptor(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        // Local server, no credentials to check.
        true
    }

    async fn invoke(&self, ctx: &RequestContext) -> Result<BackendResponse, BackendError> {
        let messages: Vec<Value> = ctx
            .request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_output) = ctx.request.max_output_tokens {
            payload["max_tokens"] = json!(max_output);
        }
        if ctx.wants_structured() {
            payload["response_format"] = json!({"type": "json_object"});
        }

        let response = self.client.post_json(COMPLETIONS_PATH, &payload).await?;

        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                BackendError::ServerError("response has no message content".to_string())
            })?
            .to_string();

        let usage = response.get("usage");
        let field = |name: &str| {
            usage
                .and_then(|u| u.get(name))
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
        };

        Ok(BackendResponse {
            content,
            model: response
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(&self.model)
                .to_string(),
            usage: TokenUsage::new(
                field("prompt_tokens"),
                field("completion_tokens"),
                field("total_tokens"),
            ),
        })
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.client.get_json(TAGS_PATH).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::request::GenerationRequest;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_bare_host() {
        assert_eq!(normalize_base_url("localhost"), "http://localhost:11434");
    }

    #[test]
    fn test_normalize_keeps_explicit_port() {
        assert_eq!(
            normalize_base_url("http://10.0.0.2:8080"),
            "http://10.0.0.2:8080"
        );
    }

    #[test]
    fn test_normalize_keeps_https() {
        assert_eq!(
            normalize_base_url("https://ollama.example.com"),
            "https://ollama.example.com"
        );
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen2.5",
                "choices": [{"message": {"content": "ok"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            })))
            .mount(&server)
            .await;

        let config =
            BackendConfig::new("local", BackendKind::Ollama, "qwen2.5").with_base_url(server.uri());
        let backend = OllamaBackend::from_config(&config).unwrap();
        let ctx = RequestContext::new(GenerationRequest::from_prompt("ping"));
        let response = backend.invoke(&ctx).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.usage.total_tokens, Some(4));
    }
}
