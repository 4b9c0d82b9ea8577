use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use lostwatch_common::{LostRecord, PostId, RankTag, SuspectRecord, WindowPolicy};

/// What a sweep decided. Applying it to the store is the caller's job.
#[derive(Debug, Default)]
pub struct SweepPlan {
    /// Suspects that stay suspects.
    pub suspects: Vec<SuspectRecord>,
    /// Suspects dropped for aging out or falling below the threshold.
    pub retired: Vec<PostId>,
    /// Suspects that left the feed and are now lost.
    pub promoted: Vec<LostRecord>,
    /// Suspects that left the feed but were already recorded as lost.
    pub already_lost: Vec<PostId>,
    /// Lost records that stay lost.
    pub lost: Vec<LostRecord>,
    /// Lost records whose post is back in the feed.
    pub resurfaced: Vec<PostId>,
    /// Lost records past the retention window.
    pub expired: Vec<PostId>,
}

impl SweepPlan {
    /// Every suspect id leaving the suspect set.
    pub fn suspect_removals(&self) -> Vec<PostId> {
        self.retired
            .iter()
            .copied()
            .chain(self.promoted.iter().map(|r| r.id()))
            .chain(self.already_lost.iter().copied())
            .collect()
    }

    /// Every lost id leaving the lost set.
    pub fn lost_removals(&self) -> Vec<PostId> {
        self.resurfaced
            .iter()
            .chain(self.expired.iter())
            .copied()
            .collect()
    }
}

/// Advance every tracked post one step through its lifecycle.
///
/// Suspect retirement is checked before promotion, so a suspect that both
/// aged out and left the feed is dropped, not promoted. Lost retirement
/// runs over the lost set as it stood before this sweep's promotions.
pub fn sweep(
    suspects: Vec<SuspectRecord>,
    lost: Vec<LostRecord>,
    feed_ids: &HashSet<PostId>,
    threshold: RankTag,
    policy: &WindowPolicy,
    now: DateTime<Utc>,
) -> SweepPlan {
    let mut plan = SweepPlan::default();

    let mut lost_by_id: HashMap<PostId, LostRecord> = HashMap::with_capacity(lost.len());
    for record in lost {
        let id = record.id();
        if feed_ids.contains(&id) {
            plan.resurfaced.push(id);
        } else if policy.is_expired(record.lost_since, now) {
            plan.expired.push(id);
        } else {
            lost_by_id.insert(id, record);
        }
    }

    for suspect in suspects {
        let id = suspect.id();
        let still_new = policy.is_new(suspect.post.creation_time, now);
        if !still_new || suspect.post.rank_tag < threshold {
            plan.retired.push(id);
        } else if feed_ids.contains(&id) {
            plan.suspects.push(suspect);
        } else if lost_by_id.contains_key(&id) {
            plan.already_lost.push(id);
        } else {
            plan.promoted.push(LostRecord {
                post: suspect.post,
                lost_since: now,
            });
        }
    }

    plan.lost = lost_by_id.into_values().collect();
    plan.lost.sort_by_key(|r| r.id());
    plan
}
