//! Inference client for a local Ollama server.
//!
//! This module handles all communication with the model endpoint:
//! - Buffered and streaming `/api/chat` calls
//! - NDJSON stream decoding with cooperative cancellation
//! - Separation of thinking from the answer (explicit field or inline tags)
//! - Image-support probing per model
//! - Client configuration loading from `ollama-chat.yaml`

pub mod cancel;
pub mod capability;
pub mod classifier;
pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod think_tags;
pub mod types;

// Re-exports for convenience
pub use cancel::{CancellationGate, NeverCancel, StopWhen};
pub use capability::{CapabilityCache, CapabilityProbe, ImageSupport};
pub use classifier::{Fragment, StreamClassifier};
pub use client::InferenceClient;
pub use config::{resolve_config, ClientConfig};
pub use errors::InferenceError;
pub use think_tags::ThinkTags;
pub use types::{ChatReply, ClassifiedEvent, Image, Message, Role};
