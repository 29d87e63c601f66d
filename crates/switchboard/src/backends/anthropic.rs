//! Anthropic messages-API adapter.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::api_client::{ApiClient, AuthMethod};
use super::errors::BackendError;
use super::{resolve_api_key, Backend, BackendDescriptor};
use crate::config::BackendConfig;
use crate::request::{BackendResponse, RequestContext, Role, TokenUsage};

pub const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "v1/messages";
const MODELS_PATH: &str = "v1/models";
const DEFAULT_MAX_TOKENS: u32 = 4_096;

pub struct AnthropicBackend {
    client: ApiClient,
    descriptor: BackendDescriptor,
    model: String,
    has_credentials: bool,
}

impl AnthropicBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let api_key = resolve_api_key(config);
        let has_credentials = api_key.is_some();
        let auth = match api_key {
            Some(key) => AuthMethod::ApiKey {
                header_name: "x-api-key".to_string(),
                key,
            },
            None => AuthMethod::None,
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_DEFAULT_BASE_URL.to_string());
        let client = ApiClient::new(&base_url, auth, Duration::from_secs(config.timeout_secs))?
            .with_header("anthropic-version", ANTHROPIC_API_VERSION)?;

        Ok(Self {
            client,
            descriptor: config.descriptor(),
            model: config.model.clone(),
            has_credentials,
        })
    }

    /// The messages API takes system text separately from the turn list.
    fn create_request(&self, ctx: &RequestContext) -> Value {
        let mut system_parts: Vec<&str> = ctx
            .request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let structured_directive = "Respond with a single valid JSON object and nothing else.";
        if ctx.wants_structured() {
            system_parts.push(structured_directive);
        }

        let messages: Vec<Value> = ctx
            .request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        let mut payload = json!({
            "model": self.model,
            "max_tokens": ctx.request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system_parts.is_empty() {
            payload["system"] = json!(system_parts.join("\n"));
        }
        payload
    }

    fn parse_response(&self, response: &Value) -> Result<BackendResponse, BackendError> {
        let content = response
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| BackendError::ServerError("response has no text content".to_string()))?;

        let model = response
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
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
            model,
            usage: TokenUsage::new(field("input_tokens"), field("output_tokens"), None),
        })
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.has_credentials
    }

    async fn invoke(&self, ctx: &RequestContext) -> Result<BackendResponse, BackendError> {
        let payload = self.create_request(ctx);
        let response = self.client.post_json(MESSAGES_PATH, &payload).await?;
        self.parse_response(&response)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.client.get_json(MODELS_PATH).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::request::{GenerationRequest, Message, ResponseFormat};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> AnthropicBackend {
        let config = BackendConfig::new("claude-main", BackendKind::Anthropic, "claude-sonnet-4-5")
            .with_base_url(server.uri());
        AnthropicBackend::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_invoke_parses_text_blocks_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", ANTHROPIC_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "claude-sonnet-4-5",
                "content": [{"type": "text", "text": "hello "}, {"type": "text", "text": "there"}],
                "usage": {"input_tokens": 9, "output_tokens": 3}
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let ctx = RequestContext::new(GenerationRequest::from_prompt("hi"));
        let response = backend.invoke(&ctx).await.unwrap();
        assert_eq!(response.content, "hello there");
        assert_eq!(response.usage.input_tokens, Some(9));
        assert_eq!(response.usage.total_tokens, Some(12));
    }

    #[test]
    fn test_request_splits_system_from_turns() {
        let config =
            BackendConfig::new("claude-main", BackendKind::Anthropic, "claude-sonnet-4-5");
        let backend = AnthropicBackend::from_config(&config).unwrap();
        let ctx = RequestContext::new(GenerationRequest::new(vec![
            Message::system("be terse"),
            Message::user("hi"),
        ]));
        let payload = backend.create_request(&ctx);
        assert_eq!(payload["system"], "be terse");
        assert_eq!(payload["messages"].as_array().unwrap().len(), 1);
        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_structured_format_adds_directive() {
        let config =
            BackendConfig::new("claude-main", BackendKind::Anthropic, "claude-sonnet-4-5");
        let backend = AnthropicBackend::from_config(&config).unwrap();
        let ctx = RequestContext::new(
            GenerationRequest::from_prompt("give me json")
                .with_response_format(ResponseFormat::Structured),
        );
        let payload = backend.create_request(&ctx);
        assert!(payload["system"]
            .as_str()
            .unwrap()
            .contains("valid JSON object"));
    }
}
