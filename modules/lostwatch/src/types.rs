use std::fmt;

use serde::Serialize;

use lostwatch_common::{PostId, WatchError};

/// Stats from a watch run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub feed_size: usize,
    pub used_secondary_feed: bool,
    pub ranks_corrected: usize,
    pub candidates: usize,
    pub detail_lookups: usize,
    pub new_suspects: usize,
    pub deferred: usize,
    pub retired_suspects: usize,
    pub promoted_to_lost: usize,
    pub resurfaced: usize,
    pub expired: usize,
    pub suspects_tracked: usize,
    pub lost_tracked: usize,
    pub watermark: Option<PostId>,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "feed={}{} candidates={} lookups={} new_suspects={} deferred={} retired={} promoted={} resurfaced={} expired={} suspects={} lost={} watermark={}",
            self.feed_size,
            if self.used_secondary_feed { " (secondary)" } else { "" },
            self.candidates,
            self.detail_lookups,
            self.new_suspects,
            self.deferred,
            self.retired_suspects,
            self.promoted_to_lost,
            self.resurfaced,
            self.expired,
            self.suspects_tracked,
            self.lost_tracked,
            self.watermark.map_or_else(|| "-".to_string(), |id| id.to_string()),
        )
    }
}

/// Outcome reported to the scheduler.
#[derive(Debug)]
pub enum RunResult {
    Success(RunStats),
    /// Transient problem; the next scheduled run should simply try again.
    Retry(String),
    /// The platform answered with something unusable.
    Failure(String),
}

impl RunResult {
    pub fn from_error(err: &WatchError) -> Self {
        if err.is_retryable() {
            RunResult::Retry(err.to_string())
        } else {
            RunResult::Failure(err.to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success(_))
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(stats) => write!(f, "success: {stats}"),
            Self::Retry(reason) => write!(f, "retry: {reason}"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}
