//! Anthropic-family provider.
//!
//! Structured output is obtained with a forced `submit_step` tool call; the
//! tool input is the step response object. Images are priced by pixel count.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::breaker::{CircuitBreaker, shared_breaker};
use crate::error::LmmError;
use crate::limiter::{RateLimiterConfig, RequestLimiter, shared_limiter};
use crate::parser::parse_step_response_value;
use crate::pricing::{image_cost_per_pixels, text_cost};
use crate::protocol::{
    LmmProvider, LmmResponse, Message, MessageContent, Role, TokenUsage, count_image_pixels,
    system_prompt_text,
};
use crate::retry::{MAX_ATTEMPTS, backoff_delay};
use crate::schemas::step_response_schema;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const ANTHROPIC_TARGET_IMAGE_SIZE: u32 = 500;

const PROVIDER: &str = "anthropic";
const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    http: reqwest::Client,
    limiter: Arc<RequestLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl AnthropicProvider {
    /// Build a provider with the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: Option<String>) -> Result<Self, LmmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LmmError::Config(
                    "Anthropic API key not configured. Set the ANTHROPIC_API_KEY \
                     environment variable."
                        .into(),
                )
            })?;
        Ok(Self::new(
            model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            api_key,
        ))
    }

    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            http: reqwest::Client::new(),
            limiter: shared_limiter(PROVIDER, RateLimiterConfig::default()),
            breaker: shared_breaker(PROVIDER),
        }
    }

    async fn call_with_retry(&self, messages: &[Message]) -> Result<LmmResponse, LmmError> {
        let mut attempt = 0;
        loop {
            match self.call_once(messages).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "anthropic call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, messages: &[Message]) -> Result<LmmResponse, LmmError> {
        let start = Instant::now();

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system_prompt_text(messages).unwrap_or_default(),
            "messages": to_anthropic_messages(messages),
            "tools": [submit_step_tool()],
            "tool_choice": {"type": "tool", "name": "submit_step"},
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LmmError::Transient {
                provider: PROVIDER,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LmmError::Transient {
            provider: PROVIDER,
            message: format!("failed to read response body: {e}"),
        })?;

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LmmError::Transient {
                provider: PROVIDER,
                message: format!("HTTP {status}: {text}"),
            });
        }
        if !status.is_success() {
            return Err(LmmError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: text,
            });
        }

        let envelope: MessagesEnvelope =
            serde_json::from_str(&text).map_err(|e| LmmError::Parse {
                provider: PROVIDER,
                message: format!("invalid response envelope: {e}"),
                raw_output: text.clone(),
            })?;

        let tool_input = envelope
            .content
            .iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { name, input } if name == "submit_step" => Some(input),
                _ => None,
            })
            .ok_or_else(|| LmmError::Parse {
                provider: PROVIDER,
                message: "no submit_step tool use in response".into(),
                raw_output: text.clone(),
            })?;

        let step = parse_step_response_value(tool_input, PROVIDER)?;

        let usage = envelope.usage.ok_or(LmmError::MissingUsage {
            provider: PROVIDER,
        })?;
        let (prompt_tokens, completion_tokens) = match (usage.input_tokens, usage.output_tokens) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                return Err(LmmError::MissingUsage {
                    provider: PROVIDER,
                });
            }
        };

        let cost_usd = text_cost(&self.model, prompt_tokens, completion_tokens)
            + image_cost_per_pixels(&self.model, count_image_pixels(messages)?);

        Ok(LmmResponse {
            step,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                cost_usd,
            },
            model: self.model.clone(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[async_trait::async_trait]
impl LmmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn target_image_size(&self) -> u32 {
        ANTHROPIC_TARGET_IMAGE_SIZE
    }

    async fn generate(&self, messages: &[Message]) -> Result<LmmResponse, LmmError> {
        self.breaker.check()?;
        self.limiter.acquire().await;

        let result = self.call_with_retry(messages).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_transient() => self.breaker.record_failure(),
            // Parse errors and application failures do not move the breaker.
            Err(_) => {}
        }
        result
    }
}

fn submit_step_tool() -> Value {
    json!({
        "name": "submit_step",
        "description": "Submit your reasoning and action for this navigation step. \
                        You MUST call this tool to provide your response.",
        "input_schema": step_response_schema(),
    })
}

/// Convert messages to the Anthropic wire format. System messages are carried
/// in the top-level `system` parameter, not in the message list.
fn to_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => unreachable!(),
            };
            let content: Vec<Value> = m
                .content
                .iter()
                .map(|c| match c {
                    MessageContent::Text { text } => json!({"type": "text", "text": text}),
                    MessageContent::Image { base64, media_type } => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": media_type,
                            "data": base64,
                        },
                    }),
                })
                .collect();
            json!({"role": role, "content": content})
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    content: Vec<ContentBlock>,
    usage: Option<UsageBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    Text {
        #[allow(dead_code)]
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UsageBlock {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_conversion_skips_system() {
        let messages = vec![
            Message::system("be a pathologist"),
            Message::user(vec![
                MessageContent::text("question"),
                MessageContent::jpeg_image("imgdata"),
            ]),
            Message::assistant_text("Reasoning: ..."),
        ];
        let converted = to_anthropic_messages(&messages);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["role"], "user");
        assert_eq!(converted[0]["content"][1]["type"], "image");
        assert_eq!(converted[0]["content"][1]["source"]["data"], "imgdata");
        assert_eq!(converted[1]["role"], "assistant");
    }

    #[test]
    fn test_envelope_with_tool_use_parses() {
        let raw = r#"{
            "content": [
                {"type": "text", "text": "thinking..."},
                {"type": "tool_use", "id": "t1", "name": "submit_step",
                 "input": {"reasoning": "r", "action":
                     {"action_type": "answer", "answer_text": "benign"}}}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 30}
        }"#;
        let envelope: MessagesEnvelope = serde_json::from_str(raw).unwrap();
        let input = envelope
            .content
            .iter()
            .find_map(|b| match b {
                ContentBlock::ToolUse { name, input } if name == "submit_step" => Some(input),
                _ => None,
            })
            .unwrap();
        let step = parse_step_response_value(input, PROVIDER).unwrap();
        assert!(step.action.is_answer());
        assert_eq!(envelope.usage.unwrap().input_tokens, Some(120));
    }

    #[test]
    fn test_envelope_tolerates_unknown_blocks() {
        let raw = r#"{
            "content": [{"type": "thinking", "thinking": "hmm"}],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }"#;
        let envelope: MessagesEnvelope = serde_json::from_str(raw).unwrap();
        assert!(matches!(envelope.content[0], ContentBlock::Other));
    }

    #[test]
    fn test_submit_step_tool_shape() {
        let tool = submit_step_tool();
        assert_eq!(tool["name"], "submit_step");
        assert!(tool["input_schema"]["properties"]["action"]["oneOf"].is_array());
    }
}
