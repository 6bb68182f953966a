//! Wire types shared by every provider: messages, the action union, token
//! accounting, and the provider trait itself.

use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::LmmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: String },
    Image { base64: String, media_type: String },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn jpeg_image(base64: impl Into<String>) -> Self {
        MessageContent::Image {
            base64: base64.into(),
            media_type: "image/jpeg".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: vec![MessageContent::text(text)],
        }
    }

    pub fn user(content: Vec<MessageContent>) -> Self {
        Message {
            role: Role::User,
            content,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: vec![MessageContent::text(text)],
        }
    }
}

/// The two actions the model may take on any step. The union is tagged by
/// `action_type`; the parser rejects everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "lowercase")]
pub enum Action {
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Answer {
        answer_text: String,
    },
}

impl Action {
    pub fn is_answer(&self) -> bool {
        matches!(self, Action::Answer { .. })
    }
}

/// One validated model turn: reasoning plus the chosen action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub reasoning: String,
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
pub struct LmmResponse {
    pub step: StepResponse,
    pub usage: TokenUsage,
    pub model: String,
    pub latency_ms: f64,
}

/// A multimodal model endpoint able to produce step responses.
#[async_trait]
pub trait LmmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &'static str;

    /// Long-side target for crop images sent to this provider.
    fn target_image_size(&self) -> u32;

    async fn generate(&self, messages: &[Message]) -> Result<LmmResponse, LmmError>;
}

/// Join the text of all system messages, or `None` when there are none.
pub fn system_prompt_text(messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .flat_map(|m| &m.content)
        .filter_map(|c| match c {
            MessageContent::Text { text } => Some(text.as_str()),
            MessageContent::Image { .. } => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Number of image parts across all messages.
pub fn count_images(messages: &[Message]) -> usize {
    messages
        .iter()
        .flat_map(|m| &m.content)
        .filter(|c| matches!(c, MessageContent::Image { .. }))
        .count()
}

/// Total pixel count across all image parts, read from the encoded image
/// headers. Used for pixel-priced providers.
pub fn count_image_pixels(messages: &[Message]) -> Result<u64, LmmError> {
    let mut total = 0u64;
    for message in messages {
        for content in &message.content {
            let MessageContent::Image { base64, .. } = content else {
                continue;
            };
            let bytes = BASE64
                .decode(base64)
                .map_err(|e| LmmError::InvalidPayload(format!("invalid base64 image: {e}")))?;
            if bytes.is_empty() {
                return Err(LmmError::InvalidPayload("empty image payload".into()));
            }
            let (w, h) = image::ImageReader::new(Cursor::new(&bytes))
                .with_guessed_format()
                .map_err(|e| LmmError::InvalidPayload(format!("unreadable image: {e}")))?
                .into_dimensions()
                .map_err(|e| LmmError::InvalidPayload(format!("undecodable image: {e}")))?;
            total += u64::from(w) * u64::from(h);
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serde_round_trip() {
        let crop = Action::Crop {
            x: 10,
            y: 20,
            width: 100,
            height: 200,
        };
        let json = serde_json::to_string(&crop).unwrap();
        assert!(json.contains("\"action_type\":\"crop\""));
        assert_eq!(serde_json::from_str::<Action>(&json).unwrap(), crop);

        let answer = Action::Answer {
            answer_text: "carcinoma".into(),
        };
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains("\"action_type\":\"answer\""));
        assert_eq!(serde_json::from_str::<Action>(&json).unwrap(), answer);
    }

    #[test]
    fn test_system_prompt_extraction() {
        let messages = vec![
            Message::system("first"),
            Message::user(vec![MessageContent::text("question")]),
            Message::system("second"),
        ];
        assert_eq!(system_prompt_text(&messages).unwrap(), "first\nsecond");
        assert_eq!(system_prompt_text(&[]), None);
    }

    #[test]
    fn test_count_images() {
        let messages = vec![
            Message::user(vec![
                MessageContent::text("q"),
                MessageContent::jpeg_image("aaaa"),
            ]),
            Message::user(vec![MessageContent::jpeg_image("bbbb")]),
        ];
        assert_eq!(count_images(&messages), 2);
    }

    #[test]
    fn test_count_image_pixels_reads_jpeg_header() {
        let img = image::RgbImage::new(32, 16);
        let mut bytes = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 85);
        encoder.encode_image(&img).unwrap();
        let b64 = BASE64.encode(&bytes);

        let messages = vec![Message::user(vec![MessageContent::jpeg_image(b64)])];
        assert_eq!(count_image_pixels(&messages).unwrap(), 32 * 16);
    }

    #[test]
    fn test_count_image_pixels_rejects_garbage() {
        let messages = vec![Message::user(vec![MessageContent::jpeg_image("@@@@")])];
        assert!(count_image_pixels(&messages).is_err());
    }
}
