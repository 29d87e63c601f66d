//! OpenAI-compatible chat-completions adapter.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::api_client::{ApiClient, AuthMethod};
use super::errors::BackendError;
use super::{resolve_api_key, Backend, BackendDescriptor};
use crate::config::BackendConfig;
use crate::request::{BackendResponse, RequestContext, TokenUsage};

pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com";
const COMPLETIONS_PATH: &str = "v1/chat/completions";
const MODELS_PATH: &str = "v1/models";

pub struct OpenAiBackend {
    client: ApiClient,
    descriptor: BackendDescriptor,
    model: String,
    has_credentials: bool,
}

impl OpenAiBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let api_key = resolve_api_key(config);
        let has_credentials = api_key.is_some();
        let auth = match api_key {
            Some(key) => AuthMethod::BearerToken(key),
            None => AuthMethod::None,
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());
        let client = ApiClient::new(&base_url, auth, Duration::from_secs(config.timeout_secs))?;

        Ok(Self {
            client,
            descriptor: config.descriptor(),
            model: config.model.clone(),
            has_credentials,
        })
    }

    fn create_request(&self, ctx: &RequestContext) -> Value {
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
        payload
    }

    fn parse_response(&self, response: &Value) -> Result<BackendResponse, BackendError> {
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

        let model = response
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(BackendResponse {
            content,
            model,
            usage: parse_usage(response),
        })
    }
}

fn parse_usage(response: &Value) -> TokenUsage {
    let usage = response.get("usage");
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    };
    TokenUsage::new(
        field("prompt_tokens"),
        field("completion_tokens"),
        field("total_tokens"),
    )
}

#[async_trait]
impl Backend for OpenAiBackend {
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
        let response = self.client.post_json(COMPLETIONS_PATH, &payload).await?;
        self.parse_response(&response)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.client.get_json(MODELS_PATH).await.map(|_| ())
    }
}
