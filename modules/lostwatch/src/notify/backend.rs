use async_trait::async_trait;

use lostwatch_common::LostRecord;

use crate::types::RunStats;

/// Pluggable notification backend for watch runs.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    /// Announce posts that were promoted to lost this run.
    async fn send_lost(&self, records: &[LostRecord]) -> anyhow::Result<()>;

    /// Send a digest summary of a watch run.
    async fn send_digest(&self, stats: &RunStats) -> anyhow::Result<()>;
}
