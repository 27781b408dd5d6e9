use std::fmt;
use std::time::Duration;

use anyhow::Result;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Response,
};
use serde_json::Value;

pub enum AuthMethod {
    BearerToken(String),
    ApiKey { header_name: String, key: String },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::BearerToken(_) => f.debug_tuple("BearerToken").field(&"[hidden]").finish(),
            AuthMethod::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("key", &"[hidden]")
                .finish(),
        }
    }
}

/// Thin HTTP client carrying host, auth and default headers for one
/// provider endpoint. Timeouts live here; they surface upstream as ordinary
/// request failures.
pub struct ApiClient {
    client: Client,
    host: String,
    auth: AuthMethod,
    default_headers: HeaderMap,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(host: String, auth: AuthMethod) -> Result<Self> {
        Self::with_timeout(host, auth, Duration::from_secs(600))
    }

    pub fn with_timeout(host: String, auth: AuthMethod, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host,
            auth,
            default_headers: HeaderMap::new(),
            timeout,
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(key.as_bytes())?;
        let header_value = HeaderValue::from_str(value)?;
        self.default_headers.insert(header_name, header_value);
        self.rebuild_client()?;
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Result<Self> {
        self.default_headers.extend(headers);
        self.rebuild_client()?;
        Ok(self)
    }

    fn rebuild_client(&mut self) -> Result<()> {
        self.client = Client::builder()
            .timeout(self.timeout)
            .default_headers(self.default_headers.clone())
            .build()?;
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn build_url(&self, path: &str) -> Result<url::Url> {
        let mut base_url =
            url::Url::parse(&self.host).map_err(|e| anyhow::anyhow!("Invalid base URL: {}", e))?;

        let base_path = base_url.path();
        if !base_path.is_empty() && base_path != "/" && !base_path.ends_with('/') {
            base_url.set_path(&format!("{}/", base_path));
        }

        base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| anyhow::anyhow!("Failed to construct URL: {}", e))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthMethod::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            AuthMethod::ApiKey { header_name, key } => request.header(header_name.as_str(), key),
        }
    }

    pub async fn response_post(&self, path: &str, payload: &Value) -> Result<Response> {
        tracing::debug!(
            "llm request: {}",
            serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
        );
        let url = self.build_url(path)?;
        let request = self.apply_auth(self.client.post(url));
        Ok(request.json(payload).send().await?)
    }

    pub async fn response_get(&self, path: &str) -> Result<Response> {
        let url = self.build_url(path)?;
        let request = self.apply_auth(self.client.get(url));
        Ok(request.send().await?)
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("host", &self.host)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
