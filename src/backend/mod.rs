//! Generation backend abstraction.
//!
//! A backend answers one assembled request (system prompt + messages +
//! output ceiling) with the raw response for that single exchange. Backends
//! may return prose, fenced, or truncated text — interpreting the content is
//! the caller's job. A backend only surfaces transport faults and in-band
//! error envelopes, both of which abort the run that issued the request.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

pub use http::HttpBackend;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the prompt exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single-exchange generation request for one pipeline stage.
///
/// Lives only for the duration of one stage attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System prompt steering the stage's output shape.
    pub system: String,
    /// Conversation messages, ending with the stage's task message.
    pub messages: Vec<ChatMessage>,
    /// Output-size ceiling hint passed through to the backend.
    pub max_output_tokens: u32,
}

/// Raw response from the backend for one request.
///
/// Content is kept as the blocks the wire format delivered; `text()`
/// flattens them for extraction.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub blocks: Vec<String>,
}

impl RawResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![text.into()],
        }
    }

    /// The response text as a single string.
    pub fn text(&self) -> String {
        self.blocks.join("\n")
    }
}

/// A generation backend capable of answering one request at a time.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn invoke(&self, request: &GenerationRequest) -> Result<RawResponse, BackendError>;
}
