//! Classification: feed snapshot → newly confirmed suspects.
//!
//! The filters run cheapest first. The id floor and rank threshold are
//! in-memory and strip most of the feed before any lookup happens; only the
//! survivors reach the detail resolver, and of those only the new suffix of
//! the id-sorted list is resolved in full.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use lostwatch_common::{
    PostId, PostStub, RankTag, SuspectRecord, TrackedPost, Watermark, WindowPolicy,
};

use crate::detail_cache::DetailCache;

pub struct ClassifyParams {
    pub threshold: RankTag,
    pub policy: WindowPolicy,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Classification {
    pub suspects: Vec<SuspectRecord>,
    pub below_floor: usize,
    pub below_rank: usize,
    pub already_tracked: usize,
    /// Candidates that reached the novelty check.
    pub candidates: usize,
    /// Candidates in the id-sorted prefix assumed old without a full check.
    pub skipped_prefix: usize,
    pub not_new: usize,
    /// Ids whose lookup failed this run; they are retried next run.
    pub deferred: Vec<PostId>,
}

pub async fn classify(
    stubs: &[PostStub],
    tracked: &HashSet<PostId>,
    watermark: Option<&Watermark>,
    cache: &mut DetailCache<'_>,
    params: &ClassifyParams,
) -> Classification {
    let mut out = Classification::default();
    let floor = watermark.map(|w| w.last_confirmed_old_id);

    // Id floor, rank threshold, and tracked exclusion: all in memory.
    // The BTreeMap dedupes the overlapping feed and sorts by id.
    let mut candidates: BTreeMap<PostId, &PostStub> = BTreeMap::new();
    for stub in stubs {
        if floor.is_some_and(|f| stub.id <= f) {
            out.below_floor += 1;
            continue;
        }
        if stub.rank_tag < params.threshold {
            out.below_rank += 1;
            continue;
        }
        if tracked.contains(&stub.id) {
            out.already_tracked += 1;
            continue;
        }
        candidates.entry(stub.id).or_insert(stub);
    }

    let ids: Vec<PostId> = candidates.keys().copied().collect();
    out.candidates = ids.len();
    if ids.is_empty() {
        return out;
    }

    // One bulk call answers most candidates at once; not worth it for a single id.
    if ids.len() > 1 {
        if let Err(e) = cache.cross_reference().await {
            warn!(error = %e, "Recent details cross-reference failed, falling back to lookups");
        }
    }

    let cut = novelty_cut(&ids, cache).await;
    out.skipped_prefix = cut;
    debug!(candidates = ids.len(), cut, "Novelty cut located");

    // Ids only roughly follow creation order, so every id past the cut is checked.
    for (id, result) in cache.get_many(&ids[cut..]).await {
        let detail = match result {
            Ok(detail) => detail,
            Err(_) => {
                out.deferred.push(id);
                continue;
            }
        };
        if !cache.is_new(&detail) {
            out.not_new += 1;
            continue;
        }
        let stub = candidates[&id];
        out.suspects.push(SuspectRecord {
            post: TrackedPost::merge(stub, &detail),
            first_seen_at: Some(params.now),
        });
    }

    if !out.suspects.is_empty() || !out.deferred.is_empty() {
        info!(
            suspects = out.suspects.len(),
            deferred = out.deferred.len(),
            candidates = out.candidates,
            "Classification complete"
        );
    }

    out
}

/// Index of the first candidate considered new, by binary search over the
/// id-sorted list. A failed lookup counts as new: that only moves the cut
/// left and sends more ids to the full check.
async fn novelty_cut(ids: &[PostId], cache: &mut DetailCache<'_>) -> usize {
    let (mut lo, mut hi) = (0, ids.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let is_new = match cache.get(ids[mid]).await {
            Ok(detail) => cache.is_new(&detail),
            Err(_) => true,
        };
        if is_new {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}
