//! OpenAI chat-completions wire format.
//!
//! Builds request payloads from [`ChatRequest`] and parses blocking and
//! streamed (SSE) responses back into transport types. Text-only messages
//! serialize as a plain content string; messages carrying media become
//! structured multi-part content.

use serde_json::{json, Value};

use crate::providers::base::{
    ChatRequest, ChatResponse, Fragment, StreamDelta, ToolCallRequest, Usage, WireMessage,
};
use crate::providers::errors::ProviderError;

fn fragment_to_value(fragment: &Fragment) -> Value {
    match fragment {
        Fragment::Text { text } => json!({"type": "text", "text": text}),
        Fragment::ImageUrl { url } => json!({"type": "image_url", "image_url": {"url": url}}),
        // The video_url part type is the de-facto extension used by
        // OpenAI-compatible multimodal endpoints (qwen-vl and friends).
        Fragment::VideoUrl { url } => json!({"type": "video_url", "video_url": {"url": url}}),
    }
}

fn message_to_value(message: &WireMessage) -> Value {
    let only_text = message.fragments.iter().all(|f| f.as_text().is_some());
    let content = if only_text {
        json!(message.joined_text())
    } else {
        json!(message
            .fragments
            .iter()
            .map(fragment_to_value)
            .collect::<Vec<_>>())
    };
    json!({"role": message.role, "content": content})
}

pub fn create_request(request: &ChatRequest, stream: bool) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.extend(request.messages.iter().map(message_to_value));

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        payload["tools"] = json!(request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect::<Vec<_>>());
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if stream {
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});
    }
    payload
}

pub fn get_usage(value: &Value) -> Usage {
    let read = |key: &str| value.get(key).and_then(|v| v.as_u64()).map(|v| v as u32);
    Usage {
        input_tokens: read("prompt_tokens"),
        output_tokens: read("completion_tokens"),
        total_tokens: read("total_tokens"),
    }
}

fn parse_tool_call(value: &Value) -> Option<ToolCallRequest> {
    let call = value.get("tool_calls")?.as_array()?.first()?;
    let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = function
        .get("arguments")
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .unwrap_or(Value::Null);
    Some(ToolCallRequest {
        id: id.to_string(),
        name,
        arguments,
    })
}

pub fn response_to_completion(response: &Value) -> Result<ChatResponse, ProviderError> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::RequestFailed("Response has no choices".to_string()))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let usage = response.get("usage").map(get_usage).unwrap_or_default();

    Ok(ChatResponse {
        text,
        tool_call: parse_tool_call(message),
        usage,
    })
}

/// Decode one SSE line from a streaming response. Returns `None` for frames
/// that carry nothing (comments, blank keep-alives, the `[DONE]` marker,
/// role-only deltas).
pub fn parse_stream_line(line: &str) -> Option<Result<StreamDelta, ProviderError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            return Some(Err(ProviderError::RequestFailed(format!(
                "Stream decode error: {}",
                e
            ))))
        }
    };
    if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
        return Some(Err(ProviderError::RequestFailed(message.to_string())));
    }

    let text = value
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let usage = value
        .get("usage")
        .filter(|u| !u.is_null())
        .map(get_usage);

    if text.is_empty() && usage.is_none() {
        return None;
    }
    Some(Ok(StreamDelta { text, usage }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{ToolSpec, WireRole};

    #[test]
    fn text_only_message_serializes_as_plain_string() {
        let mut request = ChatRequest::new("gpt-4o");
        request.system = Some("be brief".to_string());
        request
            .messages
            .push(WireMessage::text(WireRole::User, "hello"));
        let payload = create_request(&request, false);
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][1]["content"], "hello");
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn media_message_serializes_as_parts() {
        let mut request = ChatRequest::new("gpt-4o");
        request.messages.push(WireMessage {
            role: WireRole::User,
            fragments: vec![
                Fragment::text("what is this?"),
                Fragment::ImageUrl {
                    url: "https://cdn.example.com/a.png".to_string(),
                },
            ],
        });
        let payload = create_request(&request, true);
        let content = &payload["messages"][0]["content"];
        assert!(content.is_array());
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(payload["stream"], true);
    }

    #[test]
    fn tools_serialize_in_function_shape() {
        let mut request = ChatRequest::new("gpt-4o");
        request.tools.push(ToolSpec {
            name: "generate_image".to_string(),
            description: "Draw a picture".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        });
        let payload = create_request(&request, false);
        assert_eq!(payload["tools"][0]["function"]["name"], "generate_image");
    }

    #[test]
    fn completion_parses_text_and_usage() {
        let response = serde_json::json!({
            "choices": [{"message": {"content": "Hi there"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let completion = response_to_completion(&response).unwrap();
        assert_eq!(completion.text, "Hi there");
        assert_eq!(completion.usage.total_tokens, Some(15));
        assert!(completion.tool_call.is_none());
    }

    #[test]
    fn completion_parses_tool_call() {
        let response = serde_json::json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "generate_image", "arguments": "{\"prompt\":\"a cat\"}"}
                }]
            }}]
        });
        let completion = response_to_completion(&response).unwrap();
        let call = completion.tool_call.unwrap();
        assert_eq!(call.name, "generate_image");
        assert_eq!(call.arguments["prompt"], "a cat");
    }

    #[test]
    fn stream_line_decoding() {
        assert!(parse_stream_line(": keep-alive").is_none());
        assert!(parse_stream_line("data: [DONE]").is_none());

        let delta = parse_stream_line(
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(delta.text, "Hel");
        assert!(delta.usage.is_none());

        let last = parse_stream_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(last.usage.unwrap().total_tokens, Some(3));
    }

    #[test]
    fn stream_error_frame_surfaces_as_error() {
        let out = parse_stream_line(r#"data: {"error":{"message":"boom"}}"#).unwrap();
        assert!(matches!(out, Err(ProviderError::RequestFailed(m)) if m == "boom"));
    }
}
