//! Error types for the financial research assistant

use thiserror::Error;

/// Result type alias for research operations
pub type Result<T> = std::result::Result<T, ResearchError>;

#[derive(Error, Debug)]
pub enum ResearchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Provider error ({provider}): {message}")]
    ProviderError {
        provider: &'static str,
        message: String,
    },

    #[error("Provider {provider} returned HTTP {status}")]
    ProviderStatus {
        provider: &'static str,
        status: u16,
    },

    #[error("Provider {0} is not configured")]
    ProviderUnavailable(&'static str),

    #[error("No data: {0}")]
    NoData(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM returned HTTP {status}: {message}")]
    LlmStatus { status: u16, message: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

// Provider keys ride in query strings, so the URL never survives conversion.
impl From<reqwest::Error> for ResearchError {
    fn from(e: reqwest::Error) -> Self {
        ResearchError::HttpError(e.without_url())
    }
}

impl ResearchError {
    /// Whether a provider call that failed this way is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ResearchError::ProviderStatus { status, .. } => *status >= 500 || *status == 429,
            ResearchError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// A definitive refusal from one provider: a 4xx other than 429, or a
    /// payload it could not decode. The next tier of a chain may still answer.
    pub fn is_rejection(&self) -> bool {
        match self {
            ResearchError::ProviderStatus { status, .. } => (400..500).contains(status) && *status != 429,
            ResearchError::ProviderError { .. } => true,
            _ => false,
        }
    }

    /// Human-readable message safe to send to a client.
    pub fn public_message(&self) -> String {
        match self {
            ResearchError::PlanningError(_) => "Research planning failed".to_string(),
            ResearchError::ProviderError { provider, .. } => {
                format!("Data provider {} failed to respond", provider)
            }
            ResearchError::ProviderStatus { provider, status } => {
                format!("Data provider {} returned an error (HTTP {})", provider, status)
            }
            ResearchError::ProviderUnavailable(provider) => {
                format!("Data provider {} is not configured", provider)
            }
            ResearchError::NoData(msg) => msg.clone(),
            ResearchError::LlmError(_) => "The language model request failed".to_string(),
            ResearchError::LlmStatus { status, .. } => match status {
                401 | 403 => "The language model rejected the API key".to_string(),
                429 => "The language model is rate limiting requests".to_string(),
                _ => format!("The language model returned an error (HTTP {})", status),
            },
            ResearchError::StreamError(_) => "The answer stream was interrupted".to_string(),
            ResearchError::InvalidRequest(msg) => msg.clone(),
            ResearchError::ConfigError(_) => "Server configuration error".to_string(),
            ResearchError::SerializationError(_) => "Failed to decode data".to_string(),
            ResearchError::HttpError(e) if e.is_timeout() => "Upstream request timed out".to_string(),
            ResearchError::HttpError(_) => "Upstream request failed".to_string(),
            ResearchError::IoError(_) => "Internal I/O error".to_string(),
        }
    }
}
