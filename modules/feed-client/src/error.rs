use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedClientError>;

#[derive(Debug, Error)]
pub enum FeedClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl FeedClientError {
    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Parse(_) | Self::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for FeedClientError {
    fn from(err: reqwest::Error) -> Self {
        FeedClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FeedClientError {
    fn from(err: serde_json::Error) -> Self {
        FeedClientError::Parse(err.to_string())
    }
}
