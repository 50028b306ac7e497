//! Error types for podknow-rs.

/// Alias for Results returning [`PodknowError`].
pub type Result<T> = std::result::Result<T, PodknowError>;

/// Top-level error type for podknow-rs.
#[derive(Debug, thiserror::Error)]
pub enum PodknowError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl PodknowError {
    /// Whether a retry of the failed model call could plausibly succeed.
    ///
    /// Unparseable model output counts as transient: the next sample may be
    /// well-formed.
    pub fn is_transient(&self) -> bool {
        match self {
            PodknowError::Provider(e) => e.is_transient(),
            PodknowError::Serialization(_) => true,
            _ => false,
        }
    }
}

/// Model-provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited")]
    RateLimit,

    #[error("Model refused to respond")]
    Refusal,

    #[error("Empty response from provider")]
    EmptyResponse,

    #[error("Authentication failed")]
    Authentication,

    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimit
            | ProviderError::EmptyResponse
            | ProviderError::Transport(_) => true,
            ProviderError::Api { status, .. } => *status == 0 || *status >= 500,
            ProviderError::Refusal | ProviderError::Authentication => false,
        }
    }
}
