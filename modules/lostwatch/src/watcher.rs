use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use lostwatch_common::{
    LostRecord, PostId, PostStub, RankTag, Result, SuspectRecord, WatchError, Watermark,
    WindowPolicy,
};

use crate::classify::{classify, ClassifyParams};
use crate::detail_cache::DetailCache;
use crate::normalizer::normalize_ranks;
use crate::notify::backend::NotifyBackend;
use crate::notify::noop::NoopBackend;
use crate::sweeper::{sweep, SweepPlan};
use crate::traits::{DetailResolver, FeedSource, RankAuthority, TrackerStore, WatermarkStore};
use crate::types::{RunResult, RunStats};

/// Name of the store lock that keeps runs from overlapping.
pub const RUN_LOCK: &str = "lost-post-watch";

/// Long-lived collaborators for the watcher.
#[derive(Clone, TypedBuilder)]
pub struct WatchDeps {
    pub feed: Arc<dyn FeedSource>,
    pub resolver: Arc<dyn DetailResolver>,
    /// Unset disables rank normalization.
    #[builder(default, setter(strip_option))]
    pub ranks: Option<Arc<dyn RankAuthority>>,
    pub store: Arc<dyn TrackerStore>,
    pub watermark: Arc<dyn WatermarkStore>,
    #[builder(default = Arc::new(NoopBackend))]
    pub notifier: Arc<dyn NotifyBackend>,
    #[builder(default)]
    pub policy: WindowPolicy,
    #[builder(default = 4)]
    pub detail_concurrency: usize,
}

/// Detects newly created posts that drop out of the recent feed before
/// surfacing, and tracks them until they resurface or age out.
pub struct Watcher {
    deps: WatchDeps,
}

impl Watcher {
    pub fn new(deps: WatchDeps) -> Self {
        Self { deps }
    }

    /// Current suspects, for read-only consumers.
    pub async fn suspects(&self) -> Result<Vec<SuspectRecord>> {
        self.deps.store.suspects().await
    }

    /// Current lost posts, for read-only consumers.
    pub async fn lost(&self) -> Result<Vec<LostRecord>> {
        self.deps.store.lost().await
    }

    /// Run one scheduled invocation.
    pub async fn run_once(&self, locale: &str, threshold: RankTag) -> RunResult {
        self.run_once_at(locale, threshold, Utc::now()).await
    }

    /// Run one invocation unless `shutdown` resolves first. An interrupted
    /// run is abandoned mid-flight and its lock released; it yields `None`.
    pub async fn run_until(
        &self,
        locale: &str,
        threshold: RankTag,
        shutdown: impl Future<Output = ()>,
    ) -> Option<RunResult> {
        tokio::select! {
            biased;
            result = self.run_once(locale, threshold) => Some(result),
            _ = shutdown => {
                warn!("Shutdown requested mid-run, abandoning in-flight lookups");
                self.release_lock().await;
                None
            }
        }
    }

    /// Run one invocation as of `now`. Acquires the run lock, runs, releases.
    pub async fn run_once_at(
        &self,
        locale: &str,
        threshold: RankTag,
        now: DateTime<Utc>,
    ) -> RunResult {
        match self.deps.store.acquire_lock(RUN_LOCK).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Another watch run is in progress, skipping");
                return RunResult::from_error(&WatchError::LockHeld);
            }
            Err(e) => {
                warn!(error = %e, "Failed to check run lock");
                return RunResult::from_error(&e);
            }
        }

        let result = self.run_inner(locale, threshold, now).await;

        // Always release lock
        self.release_lock().await;

        match result {
            Ok(stats) => {
                info!("Watch run complete. {stats}");
                RunResult::Success(stats)
            }
            Err(e) => {
                let outcome = RunResult::from_error(&e);
                match &outcome {
                    RunResult::Failure(_) => error!(error = %e, "Watch run failed"),
                    _ => warn!(error = %e, "Watch run deferred"),
                }
                outcome
            }
        }
    }

    /// Release the run lock, e.g. after abandoning a run on shutdown.
    pub async fn release_lock(&self) {
        if let Err(e) = self.deps.store.release_lock(RUN_LOCK).await {
            warn!(error = %e, "Failed to release run lock");
        }
    }

    async fn run_inner(
        &self,
        locale: &str,
        threshold: RankTag,
        now: DateTime<Utc>,
    ) -> Result<RunStats> {
        let deps = &self.deps;
        let mut stats = RunStats::default();

        // Nothing is written until the feed has been fetched and parsed.
        let (stubs, used_secondary) = self.fetch_feed(locale).await?;
        stats.feed_size = stubs.len();
        stats.used_secondary_feed = used_secondary;

        let stubs = match &deps.ranks {
            Some(authority) => {
                let normalized = normalize_ranks(stubs, authority.as_ref()).await;
                stats.ranks_corrected = normalized.corrected;
                normalized.stubs
            }
            None => stubs,
        };

        let watermark = self.valid_watermark(now).await?;
        let existing_suspects = deps.store.suspects().await?;
        let existing_lost = deps.store.lost().await?;

        let tracked: HashSet<PostId> = existing_suspects.iter().map(|s| s.id()).collect();
        let classification = {
            let mut cache = DetailCache::new(
                deps.resolver.as_ref(),
                deps.watermark.as_ref(),
                deps.policy,
                now,
                locale,
            )
            .with_concurrency(deps.detail_concurrency)
            .with_reported_floor(watermark.map(|w| w.last_confirmed_old_id));

            let params = ClassifyParams {
                threshold,
                policy: deps.policy,
                now,
            };
            let classification =
                classify(&stubs, &tracked, watermark.as_ref(), &mut cache, &params).await;
            stats.detail_lookups = cache.lookups();
            classification
        };
        stats.candidates = classification.candidates;
        stats.deferred = classification.deferred.len();

        let new_ids: HashSet<PostId> = classification.suspects.iter().map(|s| s.id()).collect();
        let feed_ids: HashSet<PostId> = stubs.iter().map(|s| s.id).collect();
        let mut all_suspects = existing_suspects;
        all_suspects.extend(classification.suspects);

        let plan = sweep(all_suspects, existing_lost, &feed_ids, threshold, &deps.policy, now);
        self.persist(&plan, &new_ids).await?;

        stats.new_suspects = plan.suspects.iter().filter(|s| new_ids.contains(&s.id())).count();
        stats.retired_suspects = plan.retired.len();
        stats.promoted_to_lost = plan.promoted.len();
        stats.resurfaced = plan.resurfaced.len();
        stats.expired = plan.expired.len();
        stats.suspects_tracked = plan.suspects.len();
        stats.lost_tracked = plan.lost.len() + plan.promoted.len();
        stats.watermark = deps
            .watermark
            .get()
            .await
            .ok()
            .flatten()
            .map(|w| w.last_confirmed_old_id);

        if !plan.promoted.is_empty() {
            if let Err(e) = deps.notifier.send_lost(&plan.promoted).await {
                warn!(error = %e, "Failed to send lost-post notification");
            }
        }
        if let Err(e) = deps.notifier.send_digest(&stats).await {
            warn!(error = %e, "Failed to send digest notification");
        }

        Ok(stats)
    }

    /// Primary feed, falling back to the secondary one when the primary is
    /// unreachable. A malformed primary response is not retried elsewhere.
    async fn fetch_feed(&self, locale: &str) -> Result<(Vec<PostStub>, bool)> {
        let primary_err = match self.deps.feed.recent_feed(locale).await {
            Ok(stubs) => return Ok((stubs, false)),
            Err(WatchError::FeedUnavailable(msg)) => msg,
            Err(e) => return Err(e),
        };

        warn!(error = %primary_err, "Primary feed unavailable, trying secondary");
        match self.deps.feed.secondary_feed(locale).await {
            Ok(stubs) => Ok((stubs, true)),
            Err(WatchError::FeedUnavailable(secondary_err)) => Err(WatchError::FeedUnavailable(
                format!("primary: {primary_err}; secondary: {secondary_err}"),
            )),
            Err(e) => Err(e),
        }
    }

    /// The stored watermark, if it still marks a not-new post under the
    /// current window. A failing watermark is cleared so it is rebuilt from
    /// this run's lookups.
    async fn valid_watermark(&self, now: DateTime<Utc>) -> Result<Option<Watermark>> {
        let Some(watermark) = self.deps.watermark.get().await? else {
            return Ok(None);
        };
        if self.deps.policy.watermark_holds(&watermark, now) {
            return Ok(Some(watermark));
        }
        info!(
            id = watermark.last_confirmed_old_id,
            created = %watermark.creation_time,
            "Watermark no longer outside the new window, discarding"
        );
        self.deps.watermark.clear().await?;
        Ok(None)
    }

    /// Apply a sweep. Each step is an idempotent upsert or delete, ordered so
    /// that an interrupted run is repaired by the next one. Resurfaced posts
    /// leave Lost before they re-enter Suspects, so a partial write never
    /// leaves a post in both.
    async fn persist(&self, plan: &SweepPlan, new_ids: &HashSet<PostId>) -> Result<()> {
        let store = &self.deps.store;

        if !plan.promoted.is_empty() {
            store.upsert_lost(&plan.promoted).await?;
            for record in &plan.promoted {
                info!(id = record.id(), title = %record.post.title, "Post lost from feed");
            }
        }

        let suspect_removals = plan.suspect_removals();
        if !suspect_removals.is_empty() {
            store.delete_suspects(&suspect_removals).await?;
        }

        let lost_removals = plan.lost_removals();
        if !lost_removals.is_empty() {
            store.delete_lost(&lost_removals).await?;
        }

        let fresh: Vec<SuspectRecord> = plan
            .suspects
            .iter()
            .filter(|s| new_ids.contains(&s.id()))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            store.upsert_suspects(&fresh).await?;
        }

        Ok(())
    }
}
