//! Thin HTTP client shared by the backend adapters.
//!
//! Wraps `reqwest` with a base URL, an auth method and default headers,
//! and maps HTTP status codes into the [`BackendError`] taxonomy in one
//! place so adapters stay free of status-handling boilerplate.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use url::Url;

use super::errors::BackendError;

pub enum AuthMethod {
    None,
    BearerToken(String),
    ApiKey { header_name: String, key: String },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => f.write_str("None"),
            AuthMethod::BearerToken(_) => f.debug_tuple("BearerToken").field(&"[hidden]").finish(),
            AuthMethod::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("key", &"[hidden]")
                .finish(),
        }
    }
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
    auth: AuthMethod,
    default_headers: HeaderMap,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: AuthMethod, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid base URL '{}': {}", base_url, e))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth,
            default_headers: HeaderMap::new(),
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(key.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    fn build_url(&self, path: &str) -> Result<Url, BackendError> {
        let mut base = self.base_url.clone();
        let base_path = base.path();
        if !base_path.is_empty() && base_path != "/" && !base_path.ends_with('/') {
            base.set_path(&format!("{}/", base_path));
        }
        base.join(path)
            .map_err(|e| BackendError::InvalidRequest(format!("failed to construct URL: {}", e)))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthMethod::None => request,
            AuthMethod::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            AuthMethod::ApiKey { header_name, key } => request.header(header_name.as_str(), key),
        }
    }

    pub async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, BackendError> {
        let url = self.build_url(path)?;
        tracing::debug!(%url, "posting generation request");
        let request = self
            .apply_auth(self.client.post(url))
            .headers(self.default_headers.clone())
            .json(payload);
        let response = request.send().await?;
        handle_response(response).await
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, BackendError> {
        let url = self.build_url(path)?;
        let request = self
            .apply_auth(self.client.get(url))
            .headers(self.default_headers.clone());
        let response = request.send().await?;
        handle_response(response).await
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// Map an HTTP response onto the error taxonomy.
async fn handle_response(response: Response) -> Result<Value, BackendError> {
    let status = response.status();
    let retry_delay = parse_retry_after(response.headers());
    let payload: Option<Value> = response.json().await.ok();

    match status {
        StatusCode::OK | StatusCode::CREATED => payload.ok_or_else(|| {
            BackendError::ServerError("response body is not valid JSON".to_string())
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Authentication(
            format!("status {}: {}", status, error_message(&payload)),
        )),
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => Err(BackendError::InvalidRequest(format!(
            "status {}: {}",
            status,
            error_message(&payload)
        ))),
        StatusCode::TOO_MANY_REQUESTS => Err(BackendError::RateLimited {
            details: error_message(&payload),
            retry_delay,
        }),
        s if s.is_server_error() => Err(BackendError::ServerError(format!(
            "status {}: {}",
            status,
            error_message(&payload)
        ))),
        _ => Err(BackendError::ServerError(format!(
            "unexpected status {}: {}",
            status,
            error_message(&payload)
        ))),
    }
}

/// Pull a human-readable message out of the common error body shapes.
fn error_message(payload: &Option<Value>) -> String {
    payload
        .as_ref()
        .and_then(|p| {
            p.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| p.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown error".to_string())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
