//! Switchboard routes generation requests across multiple LLM backends.
//!
//! A request is classified into a complexity tier, matched against the
//! backends able to serve it, and executed through a resilience stack:
//! bounded retries with backoff on one backend, a circuit breaker per
//! backend, and an ordered fallback chain across backends. Every request
//! produces a trace; a health monitor feeds routing decisions with error
//! rates, latency percentiles and quota headroom.
//!
//! ```no_run
//! use switchboard::{Engine, EngineConfig, GenerationRequest};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::load(std::path::Path::new("switchboard.json")).await?;
//! let engine = Engine::from_config(config)?;
//! let response = engine.generate(GenerationRequest::from_prompt("hello")).await?;
//! println!("{} (via {})", response.content, response.backend_used);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod breaker;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod executor;
pub mod health;
pub mod request;
pub mod retry;
pub mod router;
pub mod trace;

pub use backends::errors::BackendError;
pub use backends::{Backend, BackendDescriptor};
pub use classifier::ComplexityTier;
pub use config::{BackendConfig, BackendKind, EngineConfig};
pub use engine::{BackendStatus, Engine};
pub use executor::EngineError;
pub use request::{GenerationRequest, GenerationResponse, Message, ResponseFormat, Role};
pub use trace::{RequestTrace, TraceSink};
