//! Shared types for the inference client.
//!
//! Conversation-side types (`Message`, `Image`), the Ollama `/api/chat` wire
//! shapes used for request building and response parsing, and the classified
//! events produced by the streaming pipeline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Conversation Types ──────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// An image attached to a user message.
///
/// The payload is stored base64-encoded, which is also the form Ollama
/// expects in the `images` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub data: String,
    pub mime_type: String,
}

impl Image {
    /// Encode raw image bytes.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Result<Self, InferenceError> {
        let mime_type = mime_type.into();
        if bytes.is_empty() {
            return Err(InferenceError::InvalidImage {
                reason: "image payload is empty".into(),
            });
        }
        if !mime_type.starts_with("image/") {
            return Err(InferenceError::InvalidImage {
                reason: format!("unsupported MIME type '{mime_type}'"),
            });
        }
        Ok(Self {
            data: BASE64.encode(bytes),
            mime_type,
        })
    }

    /// Guess the MIME type from a file extension.
    pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            "bmp" => Some("image/bmp"),
            _ => None,
        }
    }
}

/// A single turn in the conversation log.
///
/// `thinking` is display-only: it is kept for the front-end but never sent
/// back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            thinking: None,
        }
    }

    /// Attach images. Ignored for anything but user messages.
    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        if self.role == Role::User {
            self.images = images;
        }
        self
    }

    pub fn with_thinking(mut self, thinking: Option<String>) -> Self {
        self.thinking = thinking.filter(|t| !t.trim().is_empty());
        self
    }
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// Message as sent on the wire: images reduced to their base64 payloads,
/// thinking stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
}

/// Request body for `POST /api/show`.
#[derive(Debug, Clone, Serialize)]
pub struct ShowRequest<'a> {
    pub name: &'a str,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// The `message` object of a chat response (buffered or one stream line).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    /// Explicit thinking channel. Some servers call it `reasoning`.
    #[serde(default, alias = "reasoning")]
    pub thinking: Option<String>,
}

/// One NDJSON record from a streaming `/api/chat` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatStreamLine {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Server-side failure reported inside the stream.
    #[serde(default)]
    pub error: Option<String>,
}

/// Buffered (`stream: false`) `/api/chat` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: ResponseMessage,
}

/// `/api/show` response. Only the capability list is of interest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShowResponse {
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

/// `/api/tags` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

/// Model entry from `/api/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct TagModel {
    pub name: String,
}

/// Result of a buffered chat call, with thinking already separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub thinking: Option<String>,
}

// ─── Stream Events ───────────────────────────────────────────────────────────

/// A typed unit of output from the streaming pipeline.
///
/// Serializes as `{"type": "thinking"|"response"|"done"|"error", "content"?: …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClassifiedEvent {
    Thinking { content: String },
    Response { content: String },
    Done,
    Error { content: String },
}

impl ClassifiedEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking {
            content: content.into(),
        }
    }

    pub fn response(content: impl Into<String>) -> Self {
        Self::Response {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(ClassifiedEvent::thinking("hmm")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "thinking", "content": "hmm"}));

        let json = serde_json::to_value(ClassifiedEvent::Done).unwrap();
        assert_eq!(json, serde_json::json!({"type": "done"}));
    }

    #[test]
    fn test_image_from_bytes_encodes_base64() {
        let image = Image::from_bytes(b"hello", "image/png").unwrap();
        assert_eq!(image.data, "aGVsbG8=");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_image_rejects_empty_and_non_image_mime() {
        assert!(Image::from_bytes(b"", "image/png").is_err());
        assert!(Image::from_bytes(b"abc", "text/plain").is_err());
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(Image::mime_from_extension("JPG"), Some("image/jpeg"));
        assert_eq!(Image::mime_from_extension("txt"), None);
    }

    #[test]
    fn test_images_only_on_user_messages() {
        let image = Image::from_bytes(b"x", "image/png").unwrap();
        let msg = Message::assistant("hi").with_images(vec![image.clone()]);
        assert!(msg.images.is_empty());
        let msg = Message::user("look").with_images(vec![image]);
        assert_eq!(msg.images.len(), 1);
    }

    #[test]
    fn test_stream_line_tolerates_missing_fields() {
        let line: ChatStreamLine = serde_json::from_str(r#"{"done": true}"#).unwrap();
        assert!(line.done);
        assert!(line.message.is_none());

        let line: ChatStreamLine =
            serde_json::from_str(r#"{"message": {"role": "assistant", "reasoning": "x"}}"#)
                .unwrap();
        assert_eq!(line.message.unwrap().thinking.as_deref(), Some("x"));
    }

    #[test]
    fn test_wire_message_omits_absent_images() {
        let msg = WireMessage {
            role: Role::User,
            content: "hi".into(),
            images: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("images"));
    }
}
