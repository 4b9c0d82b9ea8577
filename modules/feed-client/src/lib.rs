pub mod error;
pub mod types;

pub use error::{FeedClientError, Result};
pub use types::{ApiResponse, BlogEntry, RecentAction, User};

use std::time::Duration;

use serde::de::DeserializeOwned;

pub const DEFAULT_BASE_URL: &str = "https://codeforces.com/api";

/// Largest page the recent actions endpoint will serve.
pub const MAX_RECENT_ACTIONS: u32 = 100;

/// Request timeout applied to every call. The engine relies on this as the
/// only per-item timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the most recent actions (blog entries and comments) in `locale`.
    pub async fn recent_actions(&self, max_count: u32, locale: &str) -> Result<Vec<RecentAction>> {
        let max_count = max_count.clamp(1, MAX_RECENT_ACTIONS);
        let actions: Vec<RecentAction> = self
            .call(
                "recentActions",
                &[("maxCount", max_count.to_string()), ("lang", locale.to_string())],
            )
            .await?;
        tracing::debug!(base = %self.base_url, count = actions.len(), "Fetched recent actions");
        Ok(actions)
    }

    /// Fetch a single blog entry by id.
    pub async fn blog_entry(&self, id: i64, locale: &str) -> Result<BlogEntry> {
        self.call(
            "blogEntry.view",
            &[("blogEntryId", id.to_string()), ("lang", locale.to_string())],
        )
        .await
    }

    /// Fetch current rank information for a batch of handles.
    pub async fn users(&self, handles: &[String]) -> Result<Vec<User>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        self.call("user.info", &[("handles", handles.join(";"))]).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let resp = self.client.get(&url).query(query).send().await?;

        let status = resp.status();
        let body = resp.text().await?;

        // The API answers 400 with a FAILED envelope for bad ids; surface its comment.
        if !status.is_success() {
            if let Ok(envelope) = serde_json::from_str::<ApiResponse<serde_json::Value>>(&body) {
                if envelope.status == "FAILED" && status.as_u16() == 400 {
                    return Err(FeedClientError::Rejected(
                        envelope.comment.unwrap_or_default(),
                    ));
                }
            }
            return Err(FeedClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body)?;
        match envelope.status.as_str() {
            "OK" => envelope
                .result
                .ok_or_else(|| FeedClientError::Parse(format!("{method}: OK response without result"))),
            _ => Err(FeedClientError::Rejected(envelope.comment.unwrap_or(envelope.status))),
        }
    }
}
