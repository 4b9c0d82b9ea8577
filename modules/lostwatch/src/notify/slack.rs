use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use lostwatch_common::LostRecord;

use super::backend::NotifyBackend;
use crate::types::RunStats;

/// Slack incoming webhook notification backend.
pub struct SlackWebhook {
    webhook_url: String,
    post_url_base: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    /// `post_url_base` is prefixed to a post id to link it, e.g.
    /// `https://codeforces.com/blog/entry/`.
    pub fn new(webhook_url: String, post_url_base: String) -> Self {
        Self {
            webhook_url,
            post_url_base,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned non-success");
            anyhow::bail!("Slack webhook returned {status}");
        }

        Ok(())
    }
}

#[async_trait]
impl NotifyBackend for SlackWebhook {
    async fn send_lost(&self, records: &[LostRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut lines = vec![format!(":mag: *{} post(s) dropped out of recent actions*", records.len())];
        for record in records {
            lines.push(format!(
                "  - <{}{}|{}> by {} ({})",
                self.post_url_base,
                record.id(),
                record.post.title,
                record.post.author_handle,
                record.post.rank_tag,
            ));
        }

        self.post(json!({
            "text": lines.join("\n"),
            "unfurl_links": false,
        }))
        .await
    }

    async fn send_digest(&self, stats: &RunStats) -> anyhow::Result<()> {
        if stats.new_suspects == 0 && stats.resurfaced == 0 && stats.expired == 0 {
            // Nothing to report
            return Ok(());
        }

        let text = format!(
            ":eyes: *Lost post watch*\n\
             New suspects: {}\n\
             Resurfaced: {}\n\
             Expired: {}\n\
             Tracking {} suspect(s), {} lost",
            stats.new_suspects,
            stats.resurfaced,
            stats.expired,
            stats.suspects_tracked,
            stats.lost_tracked,
        );

        self.post(json!({
            "text": text,
            "unfurl_links": false,
        }))
        .await
    }
}
