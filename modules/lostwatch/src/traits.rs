// Collaborator boundaries for the watch engine.
//
// FeedSource, DetailResolver and RankAuthority wrap the platform API.
// TrackerStore and WatermarkStore wrap persisted state.
//
// The engine only ever sees these traits, so tests swap in the mocks from
// `testing.rs`: no network, no database.

use std::collections::HashMap;

use async_trait::async_trait;

use lostwatch_common::{
    LostRecord, PostDetail, PostId, PostStub, RankTag, Result, SuspectRecord, Watermark,
};

// ---------------------------------------------------------------------------
// Platform collaborators
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Full recent activity snapshot.
    async fn recent_feed(&self, locale: &str) -> Result<Vec<PostStub>>;

    /// Smaller fallback snapshot, used when the primary feed is unreachable.
    async fn secondary_feed(&self, locale: &str) -> Result<Vec<PostStub>>;
}

#[async_trait]
pub trait DetailResolver: Send + Sync {
    /// Authoritative detail for one post. Fails with `WatchError::Lookup`.
    async fn detail(&self, id: PostId, locale: &str) -> Result<PostDetail>;

    /// Details for every post in the recent activity listing, in one call.
    /// Used to cross-reference many candidates at once.
    async fn recent_details(&self, locale: &str) -> Result<Vec<PostDetail>>;
}

#[async_trait]
pub trait RankAuthority: Send + Sync {
    /// Current rank per handle. Handles the authority does not know are omitted.
    async fn current_rank_tags(&self, handles: &[String]) -> Result<HashMap<String, RankTag>>;
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TrackerStore: Send + Sync {
    async fn suspects(&self) -> Result<Vec<SuspectRecord>>;

    async fn lost(&self) -> Result<Vec<LostRecord>>;

    /// Insert or replace suspects by post id.
    async fn upsert_suspects(&self, records: &[SuspectRecord]) -> Result<()>;

    async fn delete_suspects(&self, ids: &[PostId]) -> Result<()>;

    /// Insert lost records. An id that is already lost keeps its original
    /// `lost_since`, so replaying a promotion is harmless.
    async fn upsert_lost(&self, records: &[LostRecord]) -> Result<()>;

    async fn delete_lost(&self, ids: &[PostId]) -> Result<()>;

    /// Try to take the named run lock. Returns false if another run holds it.
    /// Locks older than 30 minutes are treated as abandoned.
    async fn acquire_lock(&self, name: &str) -> Result<bool>;

    async fn release_lock(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn get(&self) -> Result<Option<Watermark>>;

    /// Store `(id, creation_time)` unless the stored id is already equal or later.
    async fn advance_if_newer(
        &self,
        id: PostId,
        creation_time: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
