use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde_json::Value;

use super::errors::ProviderError;

/// Check the status of an OpenAI-compatible response without consuming the
/// body, so the caller can stream it.
pub async fn handle_status_openai_compat(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

/// Parse an OpenAI-compatible JSON response, mapping non-2xx statuses onto
/// the provider error taxonomy.
pub async fn handle_response_openai_compat(response: Response) -> Result<Value, ProviderError> {
    let response = handle_status_openai_compat(response).await?;
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::RequestFailed(format!("Malformed response body: {}", e)))
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = error_message_from_body(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE
            if detail.contains("context_length") || detail.contains("maximum context") =>
        {
            ProviderError::ContextLengthExceeded(detail)
        }
        s if s.is_server_error() => ProviderError::ServerError(detail),
        s => ProviderError::RequestFailed(format!("{} ({})", detail, s)),
    }
}

fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let mut text = body.to_string();
            text.truncate(500);
            text
        })
}

/// Vendor-identifying substrings that must never reach user-visible error
/// text. Mostly gateway hostnames leaking through proxied deployments.
static VENDOR_NOISE: &[&str] = &[
    "api.openai.com",
    "api.anthropic.com",
    "api.deepseek.com",
    "api.x.ai",
    "generativelanguage.googleapis.com",
    "dashscope.aliyuncs.com",
    "api.moonshot.cn",
    "openrouter.ai",
    "api.groq.com",
    "gateway.ai.cloudflare.com",
];

static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("static regex"));

/// Normalize error text for display: strip vendor hostnames and collapse
/// the whitespace the removal leaves behind.
pub fn normalize_error_text(text: &str) -> String {
    let mut out = text.to_string();
    for noise in VENDOR_NOISE {
        out = out.replace(noise, "");
    }
    SPACE_RUN.replace_all(&out, " ").trim().to_string()
}

/// Scrub C0 control characters from outgoing text. Stray control bytes
/// around pasted URLs trip some vendors' request validation; newlines and
/// tabs carry meaning and stay.
pub fn scrub_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}
