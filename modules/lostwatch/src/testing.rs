// Test mocks for the watch engine.
//
// One mock per trait boundary:
// - MockFeed (FeedSource): scripted primary/secondary behavior
// - MockResolver (DetailResolver): HashMap-based id→detail, with call counts
//   and peak in-flight lookups
// - MockAuthority (RankAuthority): HashMap-based handle→rank
// - MemoryStore (TrackerStore + WatermarkStore): stateful in-memory store
// - RecordingNotifier (NotifyBackend): remembers what it was asked to send
//
// Plus helpers for constructing stubs, details and tracked records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use lostwatch_common::{
    LostRecord, PostDetail, PostId, PostStub, RankTag, Result, SuspectRecord, TrackedPost,
    WatchError, Watermark,
};

use crate::notify::backend::NotifyBackend;
use crate::traits::{DetailResolver, FeedSource, RankAuthority, TrackerStore, WatermarkStore};
use crate::types::RunStats;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn stub(id: PostId, handle: &str, rank: RankTag) -> PostStub {
    PostStub {
        id,
        author_handle: handle.to_string(),
        rank_tag: rank,
        title: format!("Post {id}"),
        is_low_rated: false,
    }
}

/// Detail for a post created `age_hours` before `now`.
pub fn detail_aged(id: PostId, age_hours: i64, now: DateTime<Utc>) -> PostDetail {
    PostDetail {
        id,
        creation_time: now - Duration::hours(age_hours),
        title: format!("Post {id}"),
        author_handle: format!("author{id}"),
    }
}

pub fn suspect_aged(id: PostId, rank: RankTag, age_hours: i64, now: DateTime<Utc>) -> SuspectRecord {
    SuspectRecord {
        post: tracked(id, rank, now - Duration::hours(age_hours)),
        first_seen_at: Some(now - Duration::hours(age_hours)),
    }
}

pub fn lost_record(id: PostId, lost_since: DateTime<Utc>) -> LostRecord {
    LostRecord {
        post: tracked(id, RankTag::Expert, lost_since - Duration::hours(1)),
        lost_since,
    }
}

fn tracked(id: PostId, rank: RankTag, creation_time: DateTime<Utc>) -> TrackedPost {
    TrackedPost {
        id,
        author_handle: format!("author{id}"),
        rank_tag: rank,
        title: format!("Post {id}"),
        creation_time,
        is_low_rated: false,
    }
}

// ---------------------------------------------------------------------------
// MockFeed
// ---------------------------------------------------------------------------

/// What a mock feed endpoint answers with.
#[derive(Debug, Clone)]
pub enum FeedBehavior {
    Ok(Vec<PostStub>),
    Unavailable,
    Malformed,
}

impl FeedBehavior {
    fn answer(&self) -> Result<Vec<PostStub>> {
        match self {
            Self::Ok(stubs) => Ok(stubs.clone()),
            Self::Unavailable => Err(WatchError::FeedUnavailable("connection refused".into())),
            Self::Malformed => Err(WatchError::MalformedResponse("unexpected end of input".into())),
        }
    }
}

/// Feed whose answers can be changed between runs.
pub struct MockFeed {
    primary: Mutex<FeedBehavior>,
    secondary: Mutex<FeedBehavior>,
    secondary_calls: AtomicUsize,
}

impl MockFeed {
    /// Primary answers with `stubs`; secondary is unavailable.
    pub fn new(stubs: Vec<PostStub>) -> Self {
        Self {
            primary: Mutex::new(FeedBehavior::Ok(stubs)),
            secondary: Mutex::new(FeedBehavior::Unavailable),
            secondary_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_primary(&self, behavior: FeedBehavior) {
        *self.primary.lock().unwrap() = behavior;
    }

    pub fn set_secondary(&self, behavior: FeedBehavior) {
        *self.secondary.lock().unwrap() = behavior;
    }

    pub fn secondary_calls(&self) -> usize {
        self.secondary_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn recent_feed(&self, _locale: &str) -> Result<Vec<PostStub>> {
        self.primary.lock().unwrap().answer()
    }

    async fn secondary_feed(&self, _locale: &str) -> Result<Vec<PostStub>> {
        self.secondary_calls.fetch_add(1, Ordering::SeqCst);
        self.secondary.lock().unwrap().answer()
    }
}

// ---------------------------------------------------------------------------
// MockResolver
// ---------------------------------------------------------------------------

/// HashMap-based detail resolver. Unregistered ids fail like a missing post.
pub struct MockResolver {
    details: HashMap<PostId, PostDetail>,
    failing: HashSet<PostId>,
    recent: Vec<PostDetail>,
    calls: Mutex<HashMap<PostId, usize>>,
    recent_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
            failing: HashSet::new(),
            recent: Vec::new(),
            calls: Mutex::new(HashMap::new()),
            recent_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_detail(mut self, detail: PostDetail) -> Self {
        self.details.insert(detail.id, detail);
        self
    }

    pub fn failing_for(mut self, id: PostId) -> Self {
        self.failing.insert(id);
        self
    }

    /// Details returned by the bulk recent listing.
    pub fn with_recent(mut self, details: Vec<PostDetail>) -> Self {
        self.recent = details;
        self
    }

    pub fn calls_for(&self, id: PostId) -> usize {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn recent_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
    }

    /// Most lookups ever outstanding at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for MockResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetailResolver for MockResolver {
    async fn detail(&self, id: PostId, _locale: &str) -> Result<PostDetail> {
        *self.calls.lock().unwrap().entry(id).or_insert(0) += 1;

        // Suspend once so concurrent lookups overlap like network calls.
        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(outstanding, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&id) {
            return Err(WatchError::Lookup {
                id,
                message: "HTTP 503".into(),
            });
        }
        self.details.get(&id).cloned().ok_or_else(|| WatchError::Lookup {
            id,
            message: "blogEntryId not found".into(),
        })
    }

    async fn recent_details(&self, _locale: &str) -> Result<Vec<PostDetail>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.recent.clone())
    }
}

// ---------------------------------------------------------------------------
// MockAuthority
// ---------------------------------------------------------------------------

/// HashMap-based rank authority that records every request.
pub struct MockAuthority {
    ranks: HashMap<String, RankTag>,
    failing: bool,
    requested: Mutex<Vec<Vec<String>>>,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self {
            ranks: HashMap::new(),
            failing: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rank(mut self, handle: &str, rank: RankTag) -> Self {
        self.ranks.insert(handle.to_string(), rank);
        self
    }

    /// Every request fails.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn requested_handles(&self) -> Vec<Vec<String>> {
        self.requested.lock().unwrap().clone()
    }
}

impl Default for MockAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RankAuthority for MockAuthority {
    async fn current_rank_tags(&self, handles: &[String]) -> Result<HashMap<String, RankTag>> {
        self.requested.lock().unwrap().push(handles.to_vec());
        if self.failing {
            return Err(WatchError::RankLookup("HTTP 503".into()));
        }
        Ok(handles
            .iter()
            .filter_map(|h| self.ranks.get(h).map(|tag| (h.clone(), *tag)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreInner {
    suspects: BTreeMap<PostId, SuspectRecord>,
    lost: BTreeMap<PostId, LostRecord>,
    watermark: Option<Watermark>,
    watermark_history: Vec<PostId>,
    /// Lock name → holder.
    locks: HashMap<String, String>,
    /// Tracker writes left before they start failing; `None` is unlimited.
    write_budget: Option<usize>,
}

/// Holder name this store uses for its own locks.
const OWN_HOLDER: &str = "self";

/// Stateful in-memory tracker and watermark store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suspects(self, records: Vec<SuspectRecord>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for record in records {
                inner.suspects.insert(record.id(), record);
            }
        }
        self
    }

    pub fn with_lost(self, records: Vec<LostRecord>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for record in records {
                inner.lost.insert(record.id(), record);
            }
        }
        self
    }

    pub fn with_watermark(self, watermark: Watermark) -> Self {
        self.inner.lock().unwrap().watermark = Some(watermark);
        self
    }

    /// Make every subsequent store call fail, as if the database went away.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Let `writes` more tracker upserts/deletes succeed, then fail the rest,
    /// as if the connection dropped partway through persisting a run.
    pub fn fail_writes_after(&self, writes: usize) {
        self.inner.lock().unwrap().write_budget = Some(writes);
    }

    /// Lift any limit set by [`fail_writes_after`](Self::fail_writes_after).
    pub fn allow_writes(&self) {
        self.inner.lock().unwrap().write_budget = None;
    }

    /// Take a lock as another process would.
    pub fn hold_lock(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .locks
            .insert(name.to_string(), "other".to_string());
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.inner.lock().unwrap().locks.contains_key(name)
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.inner.lock().unwrap().watermark
    }

    /// Every id the watermark was set to, in order.
    pub fn watermark_history(&self) -> Vec<PostId> {
        self.inner.lock().unwrap().watermark_history.clone()
    }

    pub fn suspect_ids(&self) -> Vec<PostId> {
        self.inner.lock().unwrap().suspects.keys().copied().collect()
    }

    pub fn lost_ids(&self) -> Vec<PostId> {
        self.inner.lock().unwrap().lost.keys().copied().collect()
    }

    pub fn lost_record(&self, id: PostId) -> Option<LostRecord> {
        self.inner.lock().unwrap().lost.get(&id).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WatchError::Store("connection reset".into()));
        }
        Ok(())
    }

    /// `check`, plus spending one unit of the write budget.
    fn check_write(&self) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.write_budget {
            Some(0) => Err(WatchError::Store("connection reset".into())),
            Some(left) => {
                inner.write_budget = Some(left - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TrackerStore for MemoryStore {
    async fn suspects(&self) -> Result<Vec<SuspectRecord>> {
        self.check()?;
        Ok(self.inner.lock().unwrap().suspects.values().cloned().collect())
    }

    async fn lost(&self) -> Result<Vec<LostRecord>> {
        self.check()?;
        Ok(self.inner.lock().unwrap().lost.values().cloned().collect())
    }

    async fn upsert_suspects(&self, records: &[SuspectRecord]) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            inner.suspects.insert(record.id(), record.clone());
        }
        Ok(())
    }

    async fn delete_suspects(&self, ids: &[PostId]) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.suspects.remove(id);
        }
        Ok(())
    }

    async fn upsert_lost(&self, records: &[LostRecord]) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        for record in records {
            inner.lost.entry(record.id()).or_insert_with(|| record.clone());
        }
        Ok(())
    }

    async fn delete_lost(&self, ids: &[PostId]) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.lost.remove(id);
        }
        Ok(())
    }

    async fn acquire_lock(&self, name: &str) -> Result<bool> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.contains_key(name) {
            return Ok(false);
        }
        inner.locks.insert(name.to_string(), OWN_HOLDER.to_string());
        Ok(true)
    }

    async fn release_lock(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.get(name).is_some_and(|holder| holder == OWN_HOLDER) {
            inner.locks.remove(name);
        }
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for MemoryStore {
    async fn get(&self) -> Result<Option<Watermark>> {
        self.check()?;
        Ok(self.inner.lock().unwrap().watermark)
    }

    async fn advance_if_newer(&self, id: PostId, creation_time: DateTime<Utc>) -> Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.watermark.is_some_and(|w| w.last_confirmed_old_id >= id) {
            return Ok(());
        }
        inner.watermark = Some(Watermark {
            last_confirmed_old_id: id,
            creation_time,
        });
        inner.watermark_history.push(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.lock().unwrap().watermark = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    lost: Mutex<Vec<PostId>>,
    digests: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announced_lost(&self) -> Vec<PostId> {
        self.lost.lock().unwrap().clone()
    }

    pub fn digests(&self) -> usize {
        self.digests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotifyBackend for RecordingNotifier {
    async fn send_lost(&self, records: &[LostRecord]) -> anyhow::Result<()> {
        self.lost.lock().unwrap().extend(records.iter().map(|r| r.id()));
        Ok(())
    }

    async fn send_digest(&self, _stats: &RunStats) -> anyhow::Result<()> {
        self.digests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
