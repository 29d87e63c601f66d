//! Scripted in-memory backend used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::BackendError;
use super::{Backend, BackendDescriptor};
use crate::classifier::ComplexityTier;
use crate::request::{BackendResponse, RequestContext, TokenUsage};

/// A backend that replays a scripted sequence of outcomes.
///
/// Once the script is exhausted, every further call succeeds.
pub struct MockBackend {
    descriptor: BackendDescriptor,
    script: Mutex<VecDeque<Result<(), BackendError>>>,
    invoke_delay: Option<Duration>,
    calls: AtomicUsize,
    available: bool,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: BackendDescriptor {
                name: name.to_string(),
                priority: 10,
                supported_tiers: ComplexityTier::all(),
                requests_per_minute: None,
                requests_per_day: None,
                cost_factor: 1.0,
            },
            script: Mutex::new(VecDeque::new()),
            invoke_delay: None,
            calls: AtomicUsize::new(0),
            available: true,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<ComplexityTier>) -> Self {
        self.descriptor.supported_tiers = tiers;
        self
    }

    pub fn with_rate_limits(mut self, per_minute: Option<u64>, per_day: Option<u64>) -> Self {
        self.descriptor.requests_per_minute = per_minute;
        self.descriptor.requests_per_day = per_day;
        self
    }

    pub fn with_invoke_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Queue outcomes to replay in order.
    pub fn script(self, outcomes: Vec<Result<(), BackendError>>) -> Self {
        *self.script.lock().unwrap() = outcomes.into();
        self
    }

    pub fn failing_with(self, error: BackendError, times: usize) -> Self {
        let outcomes = std::iter::repeat_with(|| Err(error.clone()))
            .take(times)
            .collect();
        self.script(outcomes)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke(&self, _ctx: &RequestContext) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.invoke_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Err(e)) => Err(e),
            _ => Ok(BackendResponse {
                content: format!("response from {}", self.descriptor.name),
                model: "mock-model".to_string(),
                usage: TokenUsage::new(Some(10), Some(5), None),
            }),
        }
    }

    async fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
