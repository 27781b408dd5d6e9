use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported operation: {0}")]
    NotImplemented(String),
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.status().is_none() && err.is_request())
}

fn from_reqwest(error: &reqwest::Error) -> ProviderError {
    if is_network_error(error) {
        let msg = if error.is_timeout() {
            "Request timed out, check your network connection and try again.".to_string()
        } else if error.is_connect() {
            "Could not connect to the provider, check your network connection and try again."
                .to_string()
        } else {
            "Network error, check your network connection and try again.".to_string()
        };
        return ProviderError::NetworkError(msg);
    }

    let msg = match error.status() {
        Some(status) => format!("{} (status: {})", error, status),
        None => error.to_string(),
    };
    ProviderError::RequestFailed(msg)
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        from_reqwest(&error)
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
            return from_reqwest(reqwest_err);
        }
        ProviderError::ExecutionError(error.to_string())
    }
}
