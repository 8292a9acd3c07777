use thiserror::Error;

/// Result type for API calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the BigFile API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure (connect, timeout, body stream)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The service answered but reported a failure in its envelope
    #[error("Server error: {0}")]
    Server(String),

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Base URL or path could not be joined
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Create a server-reported error
    pub fn server(message: impl Into<String>) -> Self {
        ApiError::Server(message.into())
    }

    /// Whether the failure came from the network rather than the service
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Http(_))
    }

    /// Whether a later retry of the same call can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Http(_) => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            ApiError::Server(_) => true,
            ApiError::Decode(_) | ApiError::InvalidUrl(_) => false,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}
