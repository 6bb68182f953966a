//! LMM provider layer.
//!
//! Decouples the navigation agent from specific model APIs. Two provider
//! families are implemented (OpenAI responses API, Anthropic messages API);
//! both return one validated [`StepResponse`] per call plus token usage and
//! USD cost. Retry, rate limiting, and the circuit breaker live entirely
//! inside this crate; callers only see [`LmmError`] kinds.

use std::sync::Arc;

pub mod anthropic;
pub mod breaker;
pub mod error;
pub mod limiter;
pub mod openai;
pub mod parser;
pub mod pricing;
pub mod protocol;
mod retry;
pub mod schemas;

pub use anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_MODEL};
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, shared_breaker};
pub use error::LmmError;
pub use limiter::{RateLimiterConfig, RequestLimiter, shared_limiter};
pub use openai::{DEFAULT_OPENAI_MODEL, OpenAiProvider};
pub use parser::{parse_step_response_text, parse_step_response_value};
pub use protocol::{
    Action, LmmProvider, LmmResponse, Message, MessageContent, Role, StepResponse, TokenUsage,
};

/// Build a provider by name, reading the API key from the environment.
///
/// `model` overrides the per-provider default model id.
pub fn create_provider(
    provider: &str,
    model: Option<String>,
) -> Result<Arc<dyn LmmProvider>, LmmError> {
    match provider {
        "openai" => Ok(Arc::new(OpenAiProvider::from_env(model)?)),
        "anthropic" => Ok(Arc::new(AnthropicProvider::from_env(model)?)),
        other => Err(LmmError::Config(format!(
            "unknown provider '{other}', supported: 'openai', 'anthropic'"
        ))),
    }
}
