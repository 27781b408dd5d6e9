use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::factory::TransportCtor;

#[derive(Error, Debug, PartialEq)]
pub enum ModelCodeError {
    #[error("Model code cannot be empty")]
    EmptyCode,
    #[error("Malformed model code '{0}', expected '<providerId>:<code>'")]
    Malformed(String),
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),
}

/// Capability metadata resolved for one model.
///
/// Derived on demand from the builtin pattern table or a custom provider's
/// declared model list, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub context_tokens: Option<u32>,
    pub supports_vision: bool,
    pub supports_video: bool,
    pub supports_streaming: bool,
}

impl CapabilityInfo {
    /// Defaults for a model nothing knows about: text-only, assumed to
    /// stream since OpenAI-compatible endpoints overwhelmingly do.
    pub fn unknown() -> Self {
        Self {
            context_tokens: None,
            supports_vision: false,
            supports_video: false,
            supports_streaming: true,
        }
    }

    pub const fn text_only(context_tokens: u32) -> Self {
        Self {
            context_tokens: Some(context_tokens),
            supports_vision: false,
            supports_video: false,
            supports_streaming: true,
        }
    }

    pub const fn vision(context_tokens: u32) -> Self {
        Self {
            context_tokens: Some(context_tokens),
            supports_vision: true,
            supports_video: false,
            supports_streaming: true,
        }
    }

    pub const fn multimodal(context_tokens: u32) -> Self {
        Self {
            context_tokens: Some(context_tokens),
            supports_vision: true,
            supports_video: true,
            supports_streaming: true,
        }
    }
}

/// A provider shipped with the application: fixed endpoint, display
/// metadata, and optionally a specialized transport constructor for vendors
/// whose wire format needs translation to the OpenAI shape.
pub struct BuiltinProvider {
    pub id: &'static str,
    pub display_name: &'static str,
    pub api_base: &'static str,
    pub transport_ctor: Option<TransportCtor>,
}

impl fmt::Debug for BuiltinProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinProvider")
            .field("id", &self.id)
            .field("api_base", &self.api_base)
            .field(
                "transport_ctor",
                &self.transport_ctor.map(|_| "[specialized]"),
            )
            .finish()
    }
}

/// A model declared on a user-defined provider. Custom providers cannot be
/// looked up in the static capability table, so modality flags travel with
/// the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredModel {
    pub id: String,
    #[serde(default)]
    pub context_tokens: Option<u32>,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub supports_video: bool,
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
}

fn default_true() -> bool {
    true
}

impl DeclaredModel {
    pub fn capabilities(&self) -> CapabilityInfo {
        CapabilityInfo {
            context_tokens: self.context_tokens,
            supports_vision: self.supports_vision,
            supports_video: self.supports_video,
            supports_streaming: self.supports_streaming,
        }
    }
}

/// A user-defined OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProvider {
    pub id: String,
    pub display_name: String,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
    #[serde(default)]
    pub models: Vec<DeclaredModel>,
}

impl CustomProvider {
    pub fn declared_model(&self, id: &str) -> Option<&DeclaredModel> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Either a builtin provider from the static catalog or a user-defined one.
///
/// Custom providers are resolved through an injected [`CustomProviderLookup`]
/// rather than ambient global state, so parsing a persisted model code never
/// reaches into a repository behind the caller's back.
#[derive(Debug, Clone)]
pub enum ProviderRef {
    Builtin(&'static BuiltinProvider),
    Custom(Arc<CustomProvider>),
}

impl ProviderRef {
    pub fn id(&self) -> &str {
        match self {
            ProviderRef::Builtin(p) => p.id,
            ProviderRef::Custom(p) => &p.id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ProviderRef::Builtin(p) => p.display_name,
            ProviderRef::Custom(p) => &p.display_name,
        }
    }

    pub fn api_base(&self) -> &str {
        match self {
            ProviderRef::Builtin(p) => p.api_base,
            ProviderRef::Custom(p) => &p.api_base,
        }
    }
}

impl PartialEq for ProviderRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ProviderRef {}

impl Hash for ProviderRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

/// Resolves a custom provider id to its definition. Implemented by the host
/// application's settings repository; tests use a map.
pub trait CustomProviderLookup: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<CustomProvider>>;
}

impl CustomProviderLookup for std::collections::HashMap<String, Arc<CustomProvider>> {
    fn get(&self, id: &str) -> Option<Arc<CustomProvider>> {
        std::collections::HashMap::get(self, id).cloned()
    }
}

/// Identifies exactly one addressable model: a provider plus the provider's
/// name for the model. Equality is by `(provider.id, code)`.
#[derive(Debug, Clone)]
pub struct ModelCode {
    pub code: String,
    pub provider: ProviderRef,
}

impl ModelCode {
    pub fn new(code: impl Into<String>, provider: ProviderRef) -> Result<Self, ModelCodeError> {
        let code = code.into();
        if code.is_empty() {
            return Err(ModelCodeError::EmptyCode);
        }
        Ok(Self { code, provider })
    }

    /// The persisted string form, `"<providerId>:<code>"`.
    pub fn full_code(&self) -> String {
        format!("{}:{}", self.provider.id(), self.code)
    }

    /// Parse the persisted form back into a `ModelCode`. The provider id is
    /// tried against the builtin catalog first, then the injected custom
    /// provider lookup.
    pub fn from_full_code(
        full: &str,
        custom: &dyn CustomProviderLookup,
    ) -> Result<Self, ModelCodeError> {
        let (provider_id, code) = full
            .split_once(':')
            .ok_or_else(|| ModelCodeError::Malformed(full.to_string()))?;
        if code.is_empty() {
            return Err(ModelCodeError::EmptyCode);
        }
        let provider = crate::catalog::builtin_provider(provider_id)
            .map(ProviderRef::Builtin)
            .or_else(|| custom.get(provider_id).map(ProviderRef::Custom))
            .ok_or_else(|| ModelCodeError::UnknownProvider(provider_id.to_string()))?;
        Ok(Self {
            code: code.to_string(),
            provider,
        })
    }

    /// Resolve this model's capabilities. Builtin providers go through the
    /// static pattern table; custom providers through their declared list.
    pub fn capabilities(&self) -> CapabilityInfo {
        match &self.provider {
            ProviderRef::Builtin(_) => crate::catalog::resolve_builtin(&self.code),
            ProviderRef::Custom(p) => p
                .declared_model(&self.code)
                .map(|m| m.capabilities())
                .unwrap_or_else(CapabilityInfo::unknown),
        }
    }

    pub fn family(&self) -> crate::catalog::ModelFamily {
        crate::catalog::family_of(&self.code)
    }
}

impl PartialEq for ModelCode {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.provider == other.provider
    }
}

impl Eq for ModelCode {}

impl Hash for ModelCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.provider.hash(state);
        self.code.hash(state);
    }
}

impl fmt::Display for ModelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_code())
    }
}
