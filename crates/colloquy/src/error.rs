use thiserror::Error;

use crate::conversation::store::StoreError;
use crate::providers::errors::ProviderError;

/// Errors surfaced by the orchestration engine.
///
/// `TokenNotSet` and `UnsupportedMedia` are preconditions: they abort the
/// turn before anything is written. Transport failures are subject to the
/// partial-text tolerance rule in the coordinator. Retrieval failures never
/// reach callers of `execute_message` at all.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("API key not configured for provider '{0}'")]
    TokenNotSet(String),

    #[error("No compatibility handler for {0} content")]
    UnsupportedMedia(&'static str),

    #[error(transparent)]
    Transport(#[from] ProviderError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Tool '{name}' failed: {message}")]
    ToolExecution { name: String, message: String },

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Invalid(String),
}

impl EngineError {
    /// Whether the error is a precondition failure that must abort the turn
    /// with no partial write.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            EngineError::TokenNotSet(_) | EngineError::UnsupportedMedia(_)
        )
    }
}
