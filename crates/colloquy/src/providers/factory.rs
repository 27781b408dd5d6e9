//! Resolves a provider reference to a concrete transport.
//!
//! The credential check happens here, before any network call: a missing
//! API key is a precondition failure, never a 401 from the vendor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::api_client::{ApiClient, AuthMethod};
use super::base::ChatTransport;
use super::errors::ProviderError;
use super::openai_compat::OpenAiCompatTransport;
use crate::error::EngineError;
use crate::model::ProviderRef;

/// Connection parameters handed to a transport constructor.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub api_base: String,
    pub api_key: String,
    pub extra_headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// Constructor for vendors whose wire format diverges from the OpenAI shape
/// and needs request/response translation inside the transport.
pub type TransportCtor = fn(&TransportConfig) -> Result<Arc<dyn ChatTransport>, ProviderError>;

/// Where builtin-provider API keys come from. The host's settings storage
/// implements this; tests use a map.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self, provider_id: &str) -> Option<String>;
}

impl CredentialSource for HashMap<String, String> {
    fn api_key(&self, provider_id: &str) -> Option<String> {
        self.get(provider_id).cloned()
    }
}

/// Resolution seam between the engine and concrete transports. The
/// production implementation is [`TransportResolver`]; tests substitute a
/// fixed transport.
pub trait ResolveTransport: Send + Sync {
    fn resolve(&self, provider: &ProviderRef) -> Result<Arc<dyn ChatTransport>, EngineError>;
}

pub struct TransportResolver {
    credentials: Arc<dyn CredentialSource>,
    timeout: Duration,
}

impl TransportResolver {
    pub fn new(credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            credentials,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

}

impl ResolveTransport for TransportResolver {
    fn resolve(&self, provider: &ProviderRef) -> Result<Arc<dyn ChatTransport>, EngineError> {
        let config = match provider {
            ProviderRef::Builtin(builtin) => {
                let api_key = self
                    .credentials
                    .api_key(builtin.id)
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| EngineError::TokenNotSet(builtin.display_name.to_string()))?;
                TransportConfig {
                    api_base: builtin.api_base.to_string(),
                    api_key,
                    extra_headers: Vec::new(),
                    timeout: self.timeout,
                }
            }
            ProviderRef::Custom(custom) => {
                if custom.api_key.is_empty() {
                    return Err(EngineError::TokenNotSet(custom.display_name.clone()));
                }
                TransportConfig {
                    api_base: custom.api_base.clone(),
                    api_key: custom.api_key.clone(),
                    extra_headers: custom.extra_headers.clone(),
                    timeout: self.timeout,
                }
            }
        };

        let ctor = match provider {
            ProviderRef::Builtin(builtin) => builtin.transport_ctor,
            ProviderRef::Custom(_) => None,
        };
        match ctor {
            Some(specialized) => Ok(specialized(&config)?),
            None => Ok(openai_compat_transport(&config)?),
        }
    }
}

fn openai_compat_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn ChatTransport>, ProviderError> {
    let mut client = ApiClient::with_timeout(
        config.api_base.clone(),
        AuthMethod::BearerToken(config.api_key.clone()),
        config.timeout,
    )
    .map_err(|e| ProviderError::ExecutionError(e.to_string()))?;
    for (key, value) in &config.extra_headers {
        client = client
            .with_header(key, value)
            .map_err(|e| ProviderError::ExecutionError(e.to_string()))?;
    }
    Ok(Arc::new(OpenAiCompatTransport::new(client)))
}
