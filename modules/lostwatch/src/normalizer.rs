use std::collections::{BTreeSet, HashMap};

use tracing::{info, warn};

use lostwatch_common::{PostStub, RankTag};

use crate::traits::RankAuthority;

/// Handles per rank authority request.
pub const RANK_BATCH_SIZE: usize = 100;

pub struct Normalized {
    pub stubs: Vec<PostStub>,
    /// Stubs whose tag differed from the authority's answer.
    pub corrected: usize,
}

/// Replace feed-reported rank tags with the authority's current ranks.
///
/// The feed occasionally mislabels tiers (e.g. during site-wide color
/// changes), so every non-admin author is looked up. Admin tags are kept as
/// reported. A failed batch keeps the feed tags for its handles; if every
/// batch fails the input comes back unchanged.
pub async fn normalize_ranks(stubs: Vec<PostStub>, authority: &dyn RankAuthority) -> Normalized {
    let handles: BTreeSet<&str> = stubs
        .iter()
        .filter(|s| !s.rank_tag.is_admin())
        .map(|s| s.author_handle.as_str())
        .collect();

    if handles.is_empty() {
        return Normalized { stubs, corrected: 0 };
    }

    let handles: Vec<String> = handles.into_iter().map(str::to_string).collect();
    let mut ranks: HashMap<String, RankTag> = HashMap::new();
    let mut failed_batches = 0usize;
    let batches = handles.chunks(RANK_BATCH_SIZE).count();

    for batch in handles.chunks(RANK_BATCH_SIZE) {
        match authority.current_rank_tags(batch).await {
            Ok(found) => ranks.extend(found),
            Err(e) => {
                failed_batches += 1;
                warn!(error = %e, batch_size = batch.len(), "Rank lookup failed, keeping feed ranks for batch");
            }
        }
    }

    if failed_batches == batches {
        warn!("Rank normalization unavailable, using feed ranks");
        return Normalized { stubs, corrected: 0 };
    }

    let mut corrected = 0;
    let stubs = stubs
        .into_iter()
        .map(|mut stub| {
            if stub.rank_tag.is_admin() {
                return stub;
            }
            if let Some(&tag) = ranks.get(&stub.author_handle) {
                if tag != stub.rank_tag {
                    corrected += 1;
                    stub.rank_tag = tag;
                }
            }
            stub
        })
        .collect();

    if corrected > 0 {
        info!(corrected, "Corrected feed rank tags");
    }

    Normalized { stubs, corrected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub, MockAuthority};

    #[tokio::test]
    async fn corrects_mislabelled_tiers() {
        let authority = MockAuthority::new().with_rank("alice", RankTag::Master);
        let stubs = vec![stub(1, "alice", RankTag::Pupil), stub(2, "nobody", RankTag::Expert)];

        let normalized = normalize_ranks(stubs, &authority).await;
        assert_eq!(normalized.corrected, 1);
        assert_eq!(normalized.stubs[0].rank_tag, RankTag::Master);
        // Unknown to the authority: feed tag kept.
        assert_eq!(normalized.stubs[1].rank_tag, RankTag::Expert);
    }

    #[tokio::test]
    async fn admin_tags_are_never_looked_up() {
        let authority = MockAuthority::new().with_rank("root", RankTag::Newbie);
        let stubs = vec![stub(1, "root", RankTag::Admin)];

        let normalized = normalize_ranks(stubs, &authority).await;
        assert_eq!(normalized.stubs[0].rank_tag, RankTag::Admin);
        assert!(authority.requested_handles().is_empty());
    }

    #[tokio::test]
    async fn total_failure_returns_input_unchanged() {
        let authority = MockAuthority::new()
            .with_rank("alice", RankTag::Master)
            .failing();
        let stubs = vec![stub(1, "alice", RankTag::Pupil)];

        let normalized = normalize_ranks(stubs.clone(), &authority).await;
        assert_eq!(normalized.stubs, stubs);
        assert_eq!(normalized.corrected, 0);
    }

    #[tokio::test]
    async fn handles_are_batched_and_deduplicated() {
        let authority = MockAuthority::new();
        let stubs: Vec<_> = (0..(RANK_BATCH_SIZE as i64 + 5))
            .flat_map(|i| {
                let handle = format!("user{i}");
                vec![stub(i * 2, &handle, RankTag::Expert), stub(i * 2 + 1, &handle, RankTag::Expert)]
            })
            .collect();

        normalize_ranks(stubs, &authority).await;
        let batches = authority.requested_handles();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), RANK_BATCH_SIZE);
        assert_eq!(batches[1].len(), 5);
    }
}
