//! Request traces and the sink they are delivered to.
//!
//! Every routed request produces exactly one [`RequestTrace`] whether it
//! succeeded or not. Delivery is off the request path and best-effort; a
//! failing sink is logged and never fails the request.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::backends::errors::BackendError;
use crate::classifier::ComplexityTier;
use crate::request::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    /// The breaker rejected the candidate without an adapter call.
    CircuitOpen,
}

/// One backend attempt inside a request.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptTrace {
    pub backend: String,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptTrace {
    pub fn success(backend: &str, attempt: u32, latency_ms: u64) -> Self {
        Self {
            backend: backend.to_string(),
            attempt,
            outcome: AttemptOutcome::Success,
            latency_ms,
            error_kind: None,
            error: None,
        }
    }

    pub fn failure(backend: &str, attempt: u32, latency_ms: u64, error: &BackendError) -> Self {
        Self {
            backend: backend.to_string(),
            attempt,
            outcome: AttemptOutcome::Failure,
            latency_ms,
            error_kind: Some(error.kind().to_string()),
            error: Some(error.to_string()),
        }
    }

    pub fn circuit_open(backend: &str, attempt: u32) -> Self {
        Self {
            backend: backend.to_string(),
            attempt,
            outcome: AttemptOutcome::CircuitOpen,
            latency_ms: 0,
            error_kind: Some("circuit_open".to_string()),
            error: None,
        }
    }
}

/// The full story of one request through the engine.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTrace {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tier: ComplexityTier,
    /// "success" or the terminal error kind.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_used: Option<String>,
    pub attempts: Vec<AttemptTrace>,
    pub total_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl RequestTrace {
    pub fn new(tier: ComplexityTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            tier,
            outcome: String::new(),
            backend_used: None,
            attempts: Vec::new(),
            total_latency_ms: 0,
            usage: None,
        }
    }
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, trace: RequestTrace) -> anyhow::Result<()>;
}

/// Default sink: one structured log line per request.
pub struct LogSink;

#[async_trait]
impl TraceSink for LogSink {
    async fn record(&self, trace: RequestTrace) -> anyhow::Result<()> {
        tracing::info!(
            request_id = %trace.id,
            tier = ?trace.tier,
            outcome = %trace.outcome,
            backend = trace.backend_used.as_deref().unwrap_or("-"),
            attempts = trace.attempts.len(),
            latency_ms = trace.total_latency_ms,
            "request completed"
        );
        Ok(())
    }
}

/// Hands traces to the sink without blocking the request path.
#[derive(Clone)]
pub struct Recorder {
    sink: Arc<dyn TraceSink>,
}

impl Recorder {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    pub fn log_only() -> Self {
        Self::new(Arc::new(LogSink))
    }

    pub fn emit(&self, trace: RequestTrace) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let id = trace.id;
            if let Err(error) = sink.record(trace).await {
                tracing::warn!(request_id = %id, %error, "trace sink failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CapturingSink {
        traces: Mutex<Vec<RequestTrace>>,
    }

    #[async_trait]
    impl TraceSink for CapturingSink {
        async fn record(&self, trace: RequestTrace) -> anyhow::Result<()> {
            self.traces.lock().unwrap().push(trace);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl TraceSink for FailingSink {
        async fn record(&self, _trace: RequestTrace) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn test_emit_delivers_to_sink() {
        let sink = Arc::new(CapturingSink {
            traces: Mutex::new(Vec::new()),
        });
        let recorder = Recorder::new(sink.clone());

        let mut trace = RequestTrace::new(ComplexityTier::Low);
        trace.outcome = "success".to_string();
        trace.attempts.push(AttemptTrace::success("b1", 1, 12));
        recorder.emit(trace);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let recorded = sink.traces.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].outcome, "success");
        assert_eq!(recorded[0].attempts[0].backend, "b1");
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_panic() {
        let recorder = Recorder::new(Arc::new(FailingSink));
        recorder.emit(RequestTrace::new(ComplexityTier::High));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_failure_trace_captures_error_kind() {
        let error = BackendError::ServerError("boom".into());
        let attempt = AttemptTrace::failure("b1", 2, 40, &error);
        assert_eq!(attempt.outcome, AttemptOutcome::Failure);
        assert_eq!(attempt.error_kind.as_deref(), Some("server"));
        assert!(attempt.error.as_deref().unwrap().contains("boom"));
    }

    #[test]
    fn test_trace_serializes_without_empty_fields() {
        let attempt = AttemptTrace::success("b1", 1, 5);
        let json = serde_json::to_value(&attempt).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["outcome"], "success");
    }
}
