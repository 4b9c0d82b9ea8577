use thiserror::Error;

use crate::types::PostId;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Lookup failed for post {id}: {message}")]
    Lookup { id: PostId, message: String },

    #[error("Rank lookup failed: {0}")]
    RankLookup(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run lock conflict: another watch run is in progress")]
    LockHeld,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl WatchError {
    /// Whether the scheduler should try the whole run again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FeedUnavailable(_) | Self::Store(_) | Self::LockHeld | Self::Lookup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
