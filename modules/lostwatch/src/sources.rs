//! Platform API adapters for the collaborator traits.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use feed_client::{BlogEntry, FeedClient, FeedClientError, RecentAction, MAX_RECENT_ACTIONS};
use lostwatch_common::{PostDetail, PostId, PostStub, RankTag, Result, WatchError};

use crate::traits::{DetailResolver, FeedSource, RankAuthority};

/// Page size requested from the fallback feed.
const SECONDARY_FEED_SIZE: u32 = 30;

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Recent activity feed. The secondary snapshot comes from the mirror when one
/// is configured, otherwise a smaller page of the primary endpoint.
pub struct PlatformFeed {
    primary: FeedClient,
    mirror: Option<FeedClient>,
}

impl PlatformFeed {
    pub fn new(primary: FeedClient, mirror: Option<FeedClient>) -> Self {
        Self { primary, mirror }
    }
}

#[async_trait]
impl FeedSource for PlatformFeed {
    async fn recent_feed(&self, locale: &str) -> Result<Vec<PostStub>> {
        let actions = self
            .primary
            .recent_actions(MAX_RECENT_ACTIONS, locale)
            .await
            .map_err(feed_error)?;
        Ok(stubs_from_actions(&actions))
    }

    async fn secondary_feed(&self, locale: &str) -> Result<Vec<PostStub>> {
        let client = self.mirror.as_ref().unwrap_or(&self.primary);
        debug!(base = client.base_url(), "Fetching secondary feed");
        let actions = client
            .recent_actions(SECONDARY_FEED_SIZE, locale)
            .await
            .map_err(feed_error)?;
        Ok(stubs_from_actions(&actions))
    }
}

/// Convert feed actions to stubs. Comment-only actions are dropped; the same
/// post may appear several times and is left for the classifier to dedupe.
pub fn stubs_from_actions(actions: &[RecentAction]) -> Vec<PostStub> {
    actions
        .iter()
        .filter_map(|action| {
            let entry = action.blog_entry.as_ref()?;
            Some(PostStub {
                id: entry.id,
                author_handle: entry.author_handle.clone(),
                rank_tag: action
                    .author_color
                    .as_deref()
                    .map(RankTag::from_color_class)
                    .unwrap_or(RankTag::Unrated),
                title: entry.plain_title(),
                is_low_rated: entry.rating < 0,
            })
        })
        .collect()
}

fn feed_error(err: FeedClientError) -> WatchError {
    match err {
        FeedClientError::Parse(msg) => WatchError::MalformedResponse(msg),
        other => WatchError::FeedUnavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Details
// ---------------------------------------------------------------------------

pub struct PlatformResolver {
    client: FeedClient,
}

impl PlatformResolver {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DetailResolver for PlatformResolver {
    async fn detail(&self, id: PostId, locale: &str) -> Result<PostDetail> {
        let entry = self
            .client
            .blog_entry(id, locale)
            .await
            .map_err(|e| {
                if !e.is_transient() {
                    debug!(id, error = %e, "Post not retrievable");
                }
                WatchError::Lookup {
                    id,
                    message: e.to_string(),
                }
            })?;
        detail_from_entry(&entry).ok_or_else(|| WatchError::Lookup {
            id,
            message: format!("creation time {} out of range", entry.creation_time_seconds),
        })
    }

    async fn recent_details(&self, locale: &str) -> Result<Vec<PostDetail>> {
        let actions = self
            .client
            .recent_actions(MAX_RECENT_ACTIONS, locale)
            .await
            .map_err(feed_error)?;
        Ok(actions
            .iter()
            .filter_map(|a| a.blog_entry.as_ref())
            .filter_map(detail_from_entry)
            .collect())
    }
}

fn detail_from_entry(entry: &BlogEntry) -> Option<PostDetail> {
    Some(PostDetail {
        id: entry.id,
        creation_time: entry.created_at()?,
        title: entry.plain_title(),
        author_handle: entry.author_handle.clone(),
    })
}

// ---------------------------------------------------------------------------
// Ranks
// ---------------------------------------------------------------------------

pub struct PlatformRanks {
    client: FeedClient,
}

impl PlatformRanks {
    pub fn new(client: FeedClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RankAuthority for PlatformRanks {
    async fn current_rank_tags(&self, handles: &[String]) -> Result<HashMap<String, RankTag>> {
        let users = self
            .client
            .users(handles)
            .await
            .map_err(|e| WatchError::RankLookup(e.to_string()))?;
        Ok(users
            .into_iter()
            .map(|u| {
                let tag = u
                    .rank
                    .as_deref()
                    .map(RankTag::from_rank_name)
                    .unwrap_or(RankTag::Unrated);
                (u.handle, tag)
            })
            .collect())
    }
}
