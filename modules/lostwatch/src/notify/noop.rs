use async_trait::async_trait;

use lostwatch_common::LostRecord;

use super::backend::NotifyBackend;
use crate::types::RunStats;

/// No-op notification backend, used when no webhook is configured.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn send_lost(&self, _records: &[LostRecord]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_digest(&self, _stats: &RunStats) -> anyhow::Result<()> {
        Ok(())
    }
}
