//! Scripted transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use super::base::{
    ChatRequest, ChatResponse, ChatTransport, CompletionStream, StreamDelta, ToolCallRequest,
    Usage,
};
use super::errors::ProviderError;
use super::factory::ResolveTransport;
use crate::error::EngineError;
use crate::model::ProviderRef;

/// Resolver that hands back the same transport for every provider.
pub struct FixedResolver(pub std::sync::Arc<dyn ChatTransport>);

impl ResolveTransport for FixedResolver {
    fn resolve(
        &self,
        _provider: &ProviderRef,
    ) -> Result<std::sync::Arc<dyn ChatTransport>, EngineError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
pub enum MockReply {
    Text(String),
    ToolCall(ToolCallRequest),
    Stream(Vec<Result<StreamDelta, ProviderError>>),
    Error(ProviderError),
}

#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
    pub fail_embeddings: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_with(self, reply: MockReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn text_reply(self, text: &str) -> Self {
        self.reply_with(MockReply::Text(text.to_string()))
    }

    pub fn stream_reply(self, deltas: Vec<Result<StreamDelta, ProviderError>>) -> Self {
        self.reply_with(MockReply::Stream(deltas))
    }

    pub fn embedding_for(self, text: &str, vector: Vec<f32>) -> Self {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
        self
    }

    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<MockReply, ProviderError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::ExecutionError("Mock has no reply queued".to_string()))
    }

    // Deterministic fallback so tests don't have to declare every vector.
    fn synthesize_embedding(text: &str) -> Vec<f32> {
        let mut acc: u32 = 5381;
        for b in text.bytes() {
            acc = acc.wrapping_mul(33).wrapping_add(u32::from(b));
        }
        (0..4)
            .map(|i| ((acc >> (i * 8)) & 0xFF) as f32 / 255.0)
            .collect()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_reply()? {
            MockReply::Text(text) => Ok(ChatResponse {
                text,
                tool_call: None,
                usage: Usage::default(),
            }),
            MockReply::ToolCall(call) => Ok(ChatResponse {
                text: String::new(),
                tool_call: Some(call),
                usage: Usage::default(),
            }),
            MockReply::Error(err) => Err(err),
            MockReply::Stream(_) => Err(ProviderError::ExecutionError(
                "Stream reply queued for blocking call".to_string(),
            )),
        }
    }

    async fn chat_completion_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_reply()? {
            MockReply::Stream(deltas) => Ok(Box::pin(stream::iter(deltas))),
            MockReply::Text(text) => Ok(Box::pin(stream::iter(vec![Ok(StreamDelta {
                text,
                usage: None,
            })]))),
            MockReply::Error(err) => Err(err),
            MockReply::ToolCall(_) => Err(ProviderError::ExecutionError(
                "Tool call reply queued for stream call".to_string(),
            )),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["mock-model".to_string()])
    }

    async fn embeddings(
        &self,
        _model: &str,
        inputs: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if self.fail_embeddings {
            return Err(ProviderError::ServerError("Embedding backend down".to_string()));
        }
        let known = self.embeddings.lock().unwrap();
        Ok(inputs
            .iter()
            .map(|text| {
                known
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| Self::synthesize_embedding(text))
            })
            .collect())
    }
}
