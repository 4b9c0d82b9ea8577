//! End-to-end runs of the watcher against in-memory collaborators.
//!
//! Each test drives `Watcher::run_once_at` with explicit timestamps so post
//! ages and retention windows are deterministic.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use lostwatch::testing::{
    detail_aged, lost_record, stub, suspect_aged, FeedBehavior, MemoryStore, MockAuthority,
    MockFeed, MockResolver, RecordingNotifier,
};
use lostwatch::types::{RunResult, RunStats};
use lostwatch::watcher::{WatchDeps, Watcher, RUN_LOCK};
use lostwatch_common::{PostStub, RankTag, Watermark, WindowPolicy};

const LOCALE: &str = "en";

struct Harness {
    feed: Arc<MockFeed>,
    resolver: Arc<MockResolver>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    watcher: Watcher,
}

impl Harness {
    fn new(stubs: Vec<PostStub>, resolver: MockResolver, store: MemoryStore) -> Self {
        Self::with_policy(stubs, resolver, store, WindowPolicy::default())
    }

    fn with_policy(
        stubs: Vec<PostStub>,
        resolver: MockResolver,
        store: MemoryStore,
        policy: WindowPolicy,
    ) -> Self {
        let feed = Arc::new(MockFeed::new(stubs));
        let resolver = Arc::new(resolver);
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::new());
        let watcher = Watcher::new(
            WatchDeps::builder()
                .feed(feed.clone())
                .resolver(resolver.clone())
                .store(store.clone())
                .watermark(store.clone())
                .notifier(notifier.clone())
                .policy(policy)
                .build(),
        );
        Self {
            feed,
            resolver,
            store,
            notifier,
            watcher,
        }
    }

    async fn run(&self, threshold: RankTag, now: DateTime<Utc>) -> RunResult {
        self.watcher.run_once_at(LOCALE, threshold, now).await
    }

    async fn run_ok(&self, now: DateTime<Utc>) -> RunStats {
        match self.run(RankTag::Expert, now).await {
            RunResult::Success(stats) => stats,
            other => panic!("expected success, got {other}"),
        }
    }

    fn assert_disjoint(&self) {
        let lost = self.store.lost_ids();
        for id in self.store.suspect_ids() {
            assert!(!lost.contains(&id), "post {id} is both suspect and lost");
        }
    }
}

fn experts(ids: impl IntoIterator<Item = i64>) -> Vec<PostStub> {
    ids.into_iter()
        .map(|id| stub(id, &format!("author{id}"), RankTag::Expert))
        .collect()
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn watermark_spares_lookups_below_it() {
    let now = Utc::now();
    let mut resolver = MockResolver::new();
    for id in 1..=100 {
        let age = if id > 95 { 1 } else { 48 };
        resolver = resolver.with_detail(detail_aged(id, age, now));
    }
    let store = MemoryStore::new().with_watermark(Watermark {
        last_confirmed_old_id: 90,
        creation_time: now - Duration::hours(48),
    });
    let h = Harness::new(experts(1..=100), resolver, store);

    let stats = h.run_ok(now).await;

    for id in 1..=90 {
        assert_eq!(h.resolver.calls_for(id), 0, "id {id} must not be looked up");
    }
    assert_eq!(h.store.suspect_ids(), vec![96, 97, 98, 99, 100]);
    assert_eq!(stats.new_suspects, 5);
    assert_eq!(h.store.watermark().unwrap().last_confirmed_old_id, 95);
}

#[tokio::test]
async fn suspect_missing_from_feed_becomes_lost() {
    let now = Utc::now();
    let resolver = MockResolver::new()
        .with_detail(detail_aged(50, 3, now))
        .with_detail(detail_aged(10, 48, now));
    let h = Harness::new(experts([50]), resolver, MemoryStore::new());

    h.run_ok(now).await;
    assert_eq!(h.store.suspect_ids(), vec![50]);

    h.feed.set_primary(FeedBehavior::Ok(experts([10])));
    let later = now + Duration::minutes(10);
    let stats = h.run_ok(later).await;

    assert_eq!(stats.promoted_to_lost, 1);
    assert!(h.store.suspect_ids().is_empty());
    assert_eq!(h.store.lost_ids(), vec![50]);
    assert_eq!(h.store.lost_record(50).unwrap().lost_since, later);
    assert_eq!(h.notifier.announced_lost(), vec![50]);
}

#[tokio::test]
async fn lost_post_past_retention_is_removed() {
    let now = Utc::now();
    let store = MemoryStore::new().with_lost(vec![
        lost_record(7, now - Duration::days(8)),
        lost_record(8, now - Duration::days(6)),
    ]);
    let h = Harness::new(vec![], MockResolver::new(), store);

    let stats = h.run_ok(now).await;

    assert_eq!(stats.expired, 1);
    assert_eq!(h.store.lost_ids(), vec![8]);
}

#[tokio::test]
async fn new_post_below_threshold_is_never_suspect() {
    let now = Utc::now();
    let resolver = MockResolver::new().with_detail(detail_aged(200, 2, now));
    let h = Harness::new(
        vec![stub(200, "low", RankTag::Pupil)],
        resolver,
        MemoryStore::new(),
    );

    h.run_ok(now).await;

    assert!(h.store.suspect_ids().is_empty());
    assert_eq!(h.resolver.calls_for(200), 0);
}

#[tokio::test]
async fn suspect_aging_out_in_feed_is_retired_not_lost() {
    let now = Utc::now();
    let resolver = MockResolver::new().with_detail(detail_aged(300, 20, now));
    let h = Harness::new(experts([300]), resolver, MemoryStore::new());

    h.run_ok(now).await;
    assert_eq!(h.store.suspect_ids(), vec![300]);

    let stats = h.run_ok(now + Duration::hours(10)).await;

    assert_eq!(stats.retired_suspects, 1);
    assert!(h.store.suspect_ids().is_empty());
    assert!(h.store.lost_ids().is_empty());
    // Tracked posts are not looked up again.
    assert_eq!(h.resolver.calls_for(300), 1);
}

// =========================================================================
// Properties
// =========================================================================

#[tokio::test]
async fn repeated_runs_over_the_same_feed_change_nothing() {
    let now = Utc::now();
    let resolver = MockResolver::new()
        .with_detail(detail_aged(1, 30, now))
        .with_detail(detail_aged(2, 5, now))
        .with_detail(detail_aged(3, 2, now));
    let h = Harness::new(experts([1, 2, 3]), resolver, MemoryStore::new());

    let first = h.run_ok(now).await;
    let suspects = h.store.suspect_ids();
    let watermark = h.store.watermark();

    let second = h.run_ok(now).await;

    assert_eq!(first.new_suspects, 2);
    assert_eq!(second.new_suspects, 0);
    assert_eq!(h.store.suspect_ids(), suspects);
    assert_eq!(h.store.watermark(), watermark);
}

#[tokio::test]
async fn replayed_promotion_keeps_original_lost_since() {
    let now = Utc::now();
    let since = now - Duration::hours(2);
    // A crash after writing the lost record left the suspect behind.
    let store = MemoryStore::new()
        .with_suspects(vec![suspect_aged(5, RankTag::Expert, 3, now)])
        .with_lost(vec![lost_record(5, since)]);
    let h = Harness::new(vec![], MockResolver::new(), store);

    let stats = h.run_ok(now).await;

    assert_eq!(stats.promoted_to_lost, 0);
    assert!(h.store.suspect_ids().is_empty());
    assert_eq!(h.store.lost_record(5).unwrap().lost_since, since);
    h.assert_disjoint();
}

#[tokio::test]
async fn resurfaced_post_leaves_lost_and_is_tracked_again() {
    let now = Utc::now();
    let store = MemoryStore::new().with_lost(vec![lost_record(50, now - Duration::hours(1))]);
    let resolver = MockResolver::new().with_detail(detail_aged(50, 4, now));
    let h = Harness::new(experts([50]), resolver, store);

    let stats = h.run_ok(now).await;

    assert_eq!(stats.resurfaced, 1);
    assert!(h.store.lost_ids().is_empty());
    assert_eq!(h.store.suspect_ids(), vec![50]);
    h.assert_disjoint();
}

#[tokio::test]
async fn interrupted_resurfacing_never_leaves_a_post_in_both_sets() {
    let now = Utc::now();
    let store = MemoryStore::new().with_lost(vec![lost_record(50, now - Duration::hours(1))]);
    let resolver = MockResolver::new().with_detail(detail_aged(50, 4, now));
    let h = Harness::new(experts([50]), resolver, store);
    h.store.fail_writes_after(1);

    let result = h.run(RankTag::Expert, now).await;

    assert!(matches!(result, RunResult::Retry(_)), "got {result}");
    h.assert_disjoint();

    h.store.allow_writes();
    h.run_ok(now + Duration::minutes(10)).await;

    assert!(h.store.lost_ids().is_empty());
    assert_eq!(h.store.suspect_ids(), vec![50]);
}

#[tokio::test]
async fn suspect_aged_out_while_absent_is_dropped() {
    let now = Utc::now();
    let store = MemoryStore::new().with_suspects(vec![suspect_aged(301, RankTag::Expert, 30, now)]);
    let h = Harness::new(vec![], MockResolver::new(), store);

    h.run_ok(now).await;

    assert!(h.store.suspect_ids().is_empty());
    assert!(h.store.lost_ids().is_empty());
    assert!(h.notifier.announced_lost().is_empty());
}

#[tokio::test]
async fn watermark_only_moves_forward() {
    let now = Utc::now();
    let mut resolver = MockResolver::new();
    for id in 1..=30 {
        let age = if id <= 20 { 40 } else { 2 };
        resolver = resolver.with_detail(detail_aged(id, age, now));
    }
    let h = Harness::new(experts(1..=12), resolver, MemoryStore::new());

    h.run_ok(now).await;
    let first = h.store.watermark().unwrap().last_confirmed_old_id;

    h.feed.set_primary(FeedBehavior::Ok(experts(5..=30)));
    h.run_ok(now + Duration::minutes(10)).await;
    let second = h.store.watermark().unwrap().last_confirmed_old_id;

    assert_eq!(first, 12);
    assert_eq!(second, 20);
    let history = h.store.watermark_history();
    assert!(history.windows(2).all(|w| w[0] < w[1]), "history {history:?}");
}

#[tokio::test]
async fn raising_the_threshold_retires_lower_suspects() {
    let now = Utc::now();
    let resolver = MockResolver::new()
        .with_detail(detail_aged(1, 2, now))
        .with_detail(detail_aged(2, 2, now));
    let stubs = vec![
        stub(1, "expert", RankTag::Expert),
        stub(2, "master", RankTag::Master),
    ];
    let h = Harness::new(stubs, resolver, MemoryStore::new());

    h.run_ok(now).await;
    assert_eq!(h.store.suspect_ids(), vec![1, 2]);

    let result = h.run(RankTag::Master, now + Duration::minutes(10)).await;

    assert!(result.is_success());
    assert_eq!(h.store.suspect_ids(), vec![2]);
}

#[tokio::test]
async fn lengthened_window_discards_and_rebuilds_watermark() {
    let now = Utc::now();
    let mut resolver = MockResolver::new();
    for id in 80..=100 {
        let age = if id <= 85 { 72 } else { 30 };
        resolver = resolver.with_detail(detail_aged(id, age, now));
    }
    // Stored under a 24h window; 30h-old posts are new under 48h.
    let store = MemoryStore::new().with_watermark(Watermark {
        last_confirmed_old_id: 90,
        creation_time: now - Duration::hours(30),
    });
    let policy = WindowPolicy {
        new_window: Duration::hours(48),
        ..WindowPolicy::default()
    };
    let h = Harness::with_policy(experts(80..=100), resolver, store, policy);

    let stats = h.run_ok(now).await;

    assert_eq!(h.store.suspect_ids(), (86..=100).collect::<Vec<_>>());
    assert_eq!(stats.watermark, Some(85));
}

#[tokio::test]
async fn failed_lookup_defers_the_post() {
    let now = Utc::now();
    let resolver = MockResolver::new()
        .with_detail(detail_aged(1, 2, now))
        .failing_for(2);
    let h = Harness::new(experts([1, 2]), resolver, MemoryStore::new());

    let stats = h.run_ok(now).await;

    assert_eq!(stats.deferred, 1);
    assert_eq!(h.store.suspect_ids(), vec![1]);
    assert_eq!(h.resolver.calls_for(2), 1);
}

#[tokio::test]
async fn normalized_ranks_decide_eligibility() {
    let now = Utc::now();
    let feed = Arc::new(MockFeed::new(vec![stub(1, "alice", RankTag::Unrated)]));
    let resolver = Arc::new(MockResolver::new().with_detail(detail_aged(1, 2, now)));
    let store = Arc::new(MemoryStore::new());
    let watcher = Watcher::new(
        WatchDeps::builder()
            .feed(feed)
            .resolver(resolver)
            .ranks(Arc::new(MockAuthority::new().with_rank("alice", RankTag::Master)))
            .store(store.clone())
            .watermark(store.clone())
            .build(),
    );

    let stats = match watcher.run_once_at(LOCALE, RankTag::Expert, now).await {
        RunResult::Success(stats) => stats,
        other => panic!("expected success, got {other}"),
    };
    assert_eq!(stats.ranks_corrected, 1);
    assert_eq!(store.suspect_ids(), vec![1]);
}

// =========================================================================
// Failure handling
// =========================================================================

#[tokio::test]
async fn secondary_feed_serves_when_primary_is_down() {
    let now = Utc::now();
    let resolver = MockResolver::new().with_detail(detail_aged(9, 1, now));
    let h = Harness::new(vec![], resolver, MemoryStore::new());
    h.feed.set_primary(FeedBehavior::Unavailable);
    h.feed.set_secondary(FeedBehavior::Ok(experts([9])));

    let stats = h.run_ok(now).await;

    assert!(stats.used_secondary_feed);
    assert_eq!(h.store.suspect_ids(), vec![9]);
}

#[tokio::test]
async fn both_feeds_down_is_retry_without_mutation() {
    let now = Utc::now();
    let store = MemoryStore::new()
        .with_suspects(vec![suspect_aged(50, RankTag::Expert, 3, now)])
        .with_lost(vec![lost_record(7, now - Duration::days(8))]);
    let h = Harness::new(vec![], MockResolver::new(), store);
    h.feed.set_primary(FeedBehavior::Unavailable);

    let result = h.run(RankTag::Expert, now).await;

    assert!(matches!(result, RunResult::Retry(_)), "got {result}");
    assert_eq!(h.store.suspect_ids(), vec![50]);
    assert_eq!(h.store.lost_ids(), vec![7]);
    assert!(!h.store.is_locked(RUN_LOCK));
    assert_eq!(h.notifier.digests(), 0);
}

#[tokio::test]
async fn malformed_feed_is_failure_without_fallback() {
    let now = Utc::now();
    let store = MemoryStore::new().with_suspects(vec![suspect_aged(50, RankTag::Expert, 3, now)]);
    let h = Harness::new(vec![], MockResolver::new(), store);
    h.feed.set_primary(FeedBehavior::Malformed);

    let result = h.run(RankTag::Expert, now).await;

    assert!(matches!(result, RunResult::Failure(_)), "got {result}");
    assert_eq!(h.feed.secondary_calls(), 0);
    assert_eq!(h.store.suspect_ids(), vec![50]);
}

#[tokio::test]
async fn held_lock_skips_the_run() {
    let now = Utc::now();
    let resolver = MockResolver::new().with_detail(detail_aged(1, 1, now));
    let h = Harness::new(experts([1]), resolver, MemoryStore::new());
    h.store.hold_lock(RUN_LOCK);

    let result = h.run(RankTag::Expert, now).await;

    assert!(matches!(result, RunResult::Retry(_)), "got {result}");
    assert_eq!(h.resolver.total_calls(), 0);
    assert!(h.store.is_locked(RUN_LOCK), "another run's lock must not be released");
}

#[tokio::test]
async fn releasing_leaves_a_lock_held_by_another_process() {
    let h = Harness::new(vec![], MockResolver::new(), MemoryStore::new());
    h.store.hold_lock(RUN_LOCK);

    h.watcher.release_lock().await;

    assert!(h.store.is_locked(RUN_LOCK));
}

#[tokio::test]
async fn shutdown_abandons_the_run_and_frees_the_lock() {
    let now = Utc::now();
    let store = MemoryStore::new().with_lost(vec![lost_record(7, now - Duration::hours(2))]);
    let resolver = MockResolver::new().with_detail(detail_aged(1, 1, now));
    let h = Harness::new(experts([1]), resolver, store);

    // Already resolved: wins as soon as the run suspends on its first lookup.
    let outcome = h
        .watcher
        .run_until(LOCALE, RankTag::Expert, std::future::ready(()))
        .await;

    assert!(outcome.is_none(), "got {outcome:?}");
    assert_eq!(h.resolver.total_calls(), 1);
    assert!(!h.store.is_locked(RUN_LOCK));
    assert!(h.store.suspect_ids().is_empty());
    assert_eq!(h.store.lost_ids(), vec![7]);
}

#[tokio::test]
async fn run_until_returns_the_outcome_when_not_interrupted() {
    let h = Harness::new(vec![], MockResolver::new(), MemoryStore::new());

    let outcome = h
        .watcher
        .run_until(LOCALE, RankTag::Expert, std::future::pending())
        .await;

    assert!(matches!(outcome, Some(RunResult::Success(_))), "got {outcome:?}");
    assert!(!h.store.is_locked(RUN_LOCK));
}

#[tokio::test]
async fn unreachable_store_is_retry() {
    let now = Utc::now();
    let h = Harness::new(experts([1]), MockResolver::new(), MemoryStore::new());
    h.store.set_failing(true);

    let result = h.run(RankTag::Expert, now).await;

    assert!(matches!(result, RunResult::Retry(_)), "got {result}");
}

#[tokio::test]
async fn each_successful_run_sends_a_digest() {
    let now = Utc::now();
    let h = Harness::new(vec![], MockResolver::new(), MemoryStore::new());

    h.run_ok(now).await;
    h.run_ok(now + Duration::minutes(10)).await;

    assert_eq!(h.notifier.digests(), 2);
}
