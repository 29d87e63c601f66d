//! Request, response and usage types exchanged with the engine.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::classifier::ComplexityTier;
use crate::trace::AttemptTrace;

pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Whether the caller needs free text or a machine-parseable payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    Structured,
}

/// One inbound generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    /// Explicit tier override — always wins over the heuristic classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_hint: Option<ComplexityTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_deadline_ms() -> u64 {
    DEFAULT_DEADLINE_MS
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            complexity_hint: None,
            max_output_tokens: None,
            response_format: ResponseFormat::Text,
            deadline_ms: DEFAULT_DEADLINE_MS,
        }
    }

    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_hint(mut self, tier: ComplexityTier) -> Self {
        self.complexity_hint = Some(tier);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }
}

/// Per-call context owned by the request that created it.
///
/// Carries the wall-clock deadline every downstream component checks
/// against. Discarded when the call completes.
#[derive(Debug)]
pub struct RequestContext {
    pub request: GenerationRequest,
    pub started_at: Instant,
    pub deadline: Instant,
}

impl RequestContext {
    pub fn new(request: GenerationRequest) -> Self {
        let started_at = Instant::now();
        let deadline = started_at + Duration::from_millis(request.deadline_ms);
        Self {
            request,
            started_at,
            deadline,
        }
    }

    /// Time left before the deadline, or `None` once it has elapsed.
    pub fn remaining(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            None
        } else {
            Some(remaining)
        }
    }

    /// Total characters across all message contents.
    pub fn prompt_chars(&self) -> usize {
        self.request
            .messages
            .iter()
            .map(|m| m.content.chars().count())
            .sum()
    }

    pub fn wants_structured(&self) -> bool {
        self.request.response_format == ResponseFormat::Structured
    }
}

/// Token accounting reported by a backend, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl TokenUsage {
    pub fn new(
        input_tokens: Option<u32>,
        output_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Self {
        let total_tokens = total_tokens.or_else(|| match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        });
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Normalized output of a single successful backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    pub content: String,
    /// Model the backend reports having served the request with.
    pub model: String,
    pub usage: TokenUsage,
}

/// Successful outcome of the route operation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub content: String,
    pub model: String,
    pub backend_used: String,
    pub complexity_tier: ComplexityTier,
    pub attempts: Vec<AttemptTrace>,
    pub total_latency_ms: u64,
    pub usage: TokenUsage,
}
