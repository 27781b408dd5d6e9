//! The OpenAI-compatible transport used by every builtin provider without a
//! specialized wire format, and by all custom providers.

use std::io;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::json;
use tokio::pin;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use super::api_client::ApiClient;
use super::base::{ChatRequest, ChatResponse, ChatTransport, CompletionStream};
use super::errors::ProviderError;
use super::formats::openai::{
    create_request, parse_stream_line, response_to_completion,
};
use super::utils::{handle_response_openai_compat, handle_status_openai_compat};

pub const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
pub const MODELS_PATH: &str = "models";
pub const EMBEDDINGS_PATH: &str = "embeddings";

#[derive(Debug)]
pub struct OpenAiCompatTransport {
    api_client: ApiClient,
}

impl OpenAiCompatTransport {
    pub fn new(api_client: ApiClient) -> Self {
        Self { api_client }
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatTransport {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let payload = create_request(request, false);
        let response = self
            .api_client
            .response_post(CHAT_COMPLETIONS_PATH, &payload)
            .await?;
        let body = handle_response_openai_compat(response).await?;
        response_to_completion(&body)
    }

    async fn chat_completion_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let payload = create_request(request, true);
        let response = self
            .api_client
            .response_post(CHAT_COMPLETIONS_PATH, &payload)
            .await?;
        let response = handle_status_openai_compat(response).await?;

        let bytes = response.bytes_stream().map_err(io::Error::other);

        Ok(Box::pin(try_stream! {
            let reader = StreamReader::new(bytes);
            let lines = FramedRead::new(reader, LinesCodec::new())
                .map_err(|e| ProviderError::RequestFailed(format!("Stream decode error: {}", e)));
            pin!(lines);
            while let Some(line) = lines.next().await {
                let line = line?;
                if let Some(delta) = parse_stream_line(&line) {
                    yield delta?;
                }
            }
        }))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.api_client.response_get(MODELS_PATH).await?;
        let body = handle_response_openai_compat(response).await?;
        let data = body
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ProviderError::RequestFailed("Missing data field in models response".to_string())
            })?;
        let mut models: Vec<String> = data
            .iter()
            .filter_map(|m| m.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        models.sort();
        Ok(models)
    }

    async fn embeddings(
        &self,
        model: &str,
        inputs: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        let payload = json!({"model": model, "input": inputs});
        let response = self
            .api_client
            .response_post(EMBEDDINGS_PATH, &payload)
            .await?;
        let body = handle_response_openai_compat(response).await?;
        let data = body
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ProviderError::RequestFailed(
                    "Missing data field in embeddings response".to_string(),
                )
            })?;
        data.iter()
            .map(|entry| {
                entry
                    .get("embedding")
                    .and_then(|v| v.as_array())
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_f64())
                            .map(|v| v as f32)
                            .collect::<Vec<f32>>()
                    })
                    .ok_or_else(|| {
                        ProviderError::RequestFailed("Malformed embedding entry".to_string())
                    })
            })
            .collect()
    }
}
