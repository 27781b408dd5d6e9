//! The uniform transport contract every provider implements.
//!
//! Vendors whose wire format diverges from the OpenAI shape translate
//! internally; callers only ever see this operation set.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WireRole {
    System,
    User,
    Assistant,
}

/// A provider-ready content fragment. Text-only messages are serialized as
/// a plain string; anything else becomes structured multi-part content.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text { text: String },
    ImageUrl { url: String },
    VideoUrl { url: String },
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Fragment::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Fragment::VideoUrl { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub role: WireRole,
    pub fragments: Vec<Fragment>,
}

impl WireMessage {
    pub fn new(role: WireRole) -> Self {
        Self {
            role,
            fragments: Vec::new(),
        }
    }

    pub fn text(role: WireRole, text: impl Into<String>) -> Self {
        Self {
            role,
            fragments: vec![Fragment::text(text)],
        }
    }

    /// All text fragments joined with newlines.
    pub fn joined_text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(|f| f.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A tool the model may call, in the OpenAI function-calling shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A function call the model asked for instead of answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolSpec>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages: Vec::new(),
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_call: Option<ToolCallRequest>,
    pub usage: Usage,
}

/// One streamed increment: a text delta and, on the final frame, usage.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub text: String,
    pub usage: Option<Usage>,
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatTransport: std::fmt::Debug + Send + Sync {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    async fn chat_completion_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<CompletionStream, ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    async fn embeddings(
        &self,
        model: &str,
        inputs: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;
}
