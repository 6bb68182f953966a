//! OpenAI-family provider.
//!
//! Uses the Responses API with a strict JSON schema (the flattened action
//! union, since structured output cannot express `oneOf`). Images are priced
//! per image at the detail settings in use.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::breaker::{CircuitBreaker, shared_breaker};
use crate::error::LmmError;
use crate::limiter::{RateLimiterConfig, RequestLimiter, shared_limiter};
use crate::parser::parse_step_response_text;
use crate::pricing::{image_cost_per_count, text_cost};
use crate::protocol::{
    LmmProvider, LmmResponse, Message, MessageContent, Role, TokenUsage, count_images,
    system_prompt_text,
};
use crate::retry::{MAX_ATTEMPTS, backoff_delay};
use crate::schemas::step_response_schema_flat;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5.2";
pub const OPENAI_TARGET_IMAGE_SIZE: u32 = 1000;

const PROVIDER: &str = "openai";
const API_URL: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    http: reqwest::Client,
    limiter: Arc<RequestLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl OpenAiProvider {
    /// Build a provider with the API key from `OPENAI_API_KEY`.
    pub fn from_env(model: Option<String>) -> Result<Self, LmmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LmmError::Config(
                    "OpenAI API key not configured. Set the OPENAI_API_KEY \
                     environment variable."
                        .into(),
                )
            })?;
        Ok(Self::new(
            model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
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
                        "openai call failed, retrying"
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

        let mut body = json!({
            "model": self.model,
            "input": to_openai_input(messages),
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "step_response",
                    "strict": true,
                    "schema": step_response_schema_flat(),
                }
            },
        });
        if let Some(system) = system_prompt_text(messages) {
            body["instructions"] = Value::String(system);
        }

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.api_key)
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

        let envelope: ResponsesEnvelope =
            serde_json::from_str(&text).map_err(|e| LmmError::Parse {
                provider: PROVIDER,
                message: format!("invalid response envelope: {e}"),
                raw_output: text.clone(),
            })?;

        let output_text = envelope
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| &item.content)
            .find(|content| content.kind == "output_text")
            .map(|content| content.text.as_str())
            .ok_or_else(|| LmmError::Parse {
                provider: PROVIDER,
                message: "no output_text in response".into(),
                raw_output: text.clone(),
            })?;

        let step = parse_step_response_text(output_text, PROVIDER)?;

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
            + image_cost_per_count(&self.model, count_images(messages));

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
impl LmmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn target_image_size(&self) -> u32 {
        OPENAI_TARGET_IMAGE_SIZE
    }

    async fn generate(&self, messages: &[Message]) -> Result<LmmResponse, LmmError> {
        self.breaker.check()?;
        self.limiter.acquire().await;

        let result = self.call_with_retry(messages).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_transient() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

/// Convert messages to Responses API input items. The Responses API only
/// accepts images on user turns; assistant turns carry `output_text`.
fn to_openai_input(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::User => {
                let content: Vec<Value> = m
                    .content
                    .iter()
                    .map(|c| match c {
                        MessageContent::Text { text } => {
                            json!({"type": "input_text", "text": text})
                        }
                        MessageContent::Image { base64, media_type } => json!({
                            "type": "input_image",
                            "image_url": format!("data:{media_type};base64,{base64}"),
                        }),
                    })
                    .collect();
                json!({"role": "user", "content": content})
            }
            Role::Assistant => {
                let content: Vec<Value> = m
                    .content
                    .iter()
                    .filter_map(|c| match c {
                        MessageContent::Text { text } => {
                            Some(json!({"type": "output_text", "text": text}))
                        }
                        MessageContent::Image { .. } => None,
                    })
                    .collect();
                json!({"role": "assistant", "content": content})
            }
            Role::System => unreachable!(),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ResponsesEnvelope {
    output: Vec<OutputItem>,
    usage: Option<UsageBlock>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
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
    fn test_input_conversion() {
        let messages = vec![
            Message::system("system text"),
            Message::user(vec![
                MessageContent::text("q"),
                MessageContent::jpeg_image("abcd"),
            ]),
            Message::assistant_text("Reasoning: ..."),
        ];
        let input = to_openai_input(&messages);
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(
            input[0]["content"][1]["image_url"],
            "data:image/jpeg;base64,abcd"
        );
        assert_eq!(input[1]["content"][0]["type"], "output_text");
    }

    #[test]
    fn test_envelope_extraction() {
        let raw = r#"{
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text",
                     "text": "{\"reasoning\": \"r\", \"action\": {\"action_type\": \"answer\", \"x\": null, \"y\": null, \"width\": null, \"height\": null, \"answer_text\": \"benign\"}}"}
                ]}
            ],
            "usage": {"input_tokens": 200, "output_tokens": 40}
        }"#;
        let envelope: ResponsesEnvelope = serde_json::from_str(raw).unwrap();
        let text = envelope
            .output
            .iter()
            .filter(|i| i.kind == "message")
            .flat_map(|i| &i.content)
            .find(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .unwrap();
        let step = parse_step_response_text(text, PROVIDER).unwrap();
        assert!(step.action.is_answer());
    }

    #[test]
    fn test_missing_usage_detected() {
        let raw = r#"{"output": []}"#;
        let envelope: ResponsesEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.usage.is_none());
    }
}
