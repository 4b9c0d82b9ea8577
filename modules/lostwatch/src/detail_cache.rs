use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use lostwatch_common::{PostDetail, PostId, Result, WatchError, WindowPolicy};

use crate::traits::{DetailResolver, WatermarkStore};

/// Per-run memo of detail lookups.
///
/// Each id costs at most one resolver call per run, failures included. Every
/// detail that enters the cache and turns out not-new ratchets the watermark
/// forward. Owned by a single run and dropped when the run ends.
pub struct DetailCache<'a> {
    resolver: &'a dyn DetailResolver,
    watermark: &'a dyn WatermarkStore,
    policy: WindowPolicy,
    now: DateTime<Utc>,
    locale: String,
    concurrency: usize,
    entries: HashMap<PostId, PostDetail>,
    failures: HashMap<PostId, String>,
    /// Highest id already known to the watermark store this run.
    reported_floor: Option<PostId>,
    lookups: usize,
}

impl<'a> DetailCache<'a> {
    pub fn new(
        resolver: &'a dyn DetailResolver,
        watermark: &'a dyn WatermarkStore,
        policy: WindowPolicy,
        now: DateTime<Utc>,
        locale: &str,
    ) -> Self {
        Self {
            resolver,
            watermark,
            policy,
            now,
            locale: locale.to_string(),
            concurrency: 4,
            entries: HashMap::new(),
            failures: HashMap::new(),
            reported_floor: None,
            lookups: 0,
        }
    }

    /// Maximum number of lookups in flight during `get_many`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Skip watermark writes for ids at or below `floor`.
    pub fn with_reported_floor(mut self, floor: Option<PostId>) -> Self {
        self.reported_floor = floor;
        self
    }

    /// Resolver calls issued so far, bulk cross-references excluded.
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn is_new(&self, detail: &PostDetail) -> bool {
        self.policy.is_new(detail.creation_time, self.now)
    }

    /// Seed the cache from the resolver's bulk recent listing.
    /// Returns how many details were added.
    pub async fn cross_reference(&mut self) -> Result<usize> {
        let details = self.resolver.recent_details(&self.locale).await?;
        let mut added = 0;
        for detail in details {
            if !self.entries.contains_key(&detail.id) {
                self.admit(detail).await;
                added += 1;
            }
        }
        debug!(added, "Primed detail cache from recent listing");
        Ok(added)
    }

    pub async fn get(&mut self, id: PostId) -> Result<PostDetail> {
        if let Some(detail) = self.entries.get(&id) {
            return Ok(detail.clone());
        }
        if let Some(message) = self.failures.get(&id) {
            return Err(lookup_error(id, message));
        }

        self.lookups += 1;
        match self.resolver.detail(id, &self.locale).await {
            Ok(detail) => {
                self.admit(detail.clone()).await;
                Ok(detail)
            }
            Err(e) => {
                let message = e.to_string();
                self.failures.insert(id, message.clone());
                Err(lookup_error(id, &message))
            }
        }
    }

    /// Resolve several ids, issuing the uncached lookups concurrently.
    /// Results come back in input order.
    pub async fn get_many(&mut self, ids: &[PostId]) -> Vec<(PostId, Result<PostDetail>)> {
        let mut missing: Vec<PostId> = ids
            .iter()
            .copied()
            .filter(|id| !self.entries.contains_key(id) && !self.failures.contains_key(id))
            .collect();
        missing.sort_unstable();
        missing.dedup();

        if !missing.is_empty() {
            self.lookups += missing.len();
            let resolver = self.resolver;
            let locale = self.locale.as_str();
            let fetched: Vec<(PostId, Result<PostDetail>)> =
                stream::iter(missing.into_iter().map(|id| async move {
                    (id, resolver.detail(id, locale).await)
                }))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (id, result) in fetched {
                match result {
                    Ok(detail) => self.admit(detail).await,
                    Err(e) => {
                        warn!(id, error = %e, "Detail lookup failed, deferring to next run");
                        self.failures.insert(id, e.to_string());
                    }
                }
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = match (self.entries.get(&id), self.failures.get(&id)) {
                (Some(detail), _) => Ok(detail.clone()),
                (None, Some(message)) => Err(lookup_error(id, message)),
                (None, None) => Err(lookup_error(id, "not resolved")),
            };
            out.push((id, result));
        }
        out
    }

    async fn admit(&mut self, detail: PostDetail) {
        if !self.is_new(&detail) && self.reported_floor.map_or(true, |floor| detail.id > floor) {
            match self
                .watermark
                .advance_if_newer(detail.id, detail.creation_time)
                .await
            {
                Ok(()) => self.reported_floor = Some(detail.id),
                Err(e) => warn!(id = detail.id, error = %e, "Failed to advance watermark"),
            }
        }
        self.entries.insert(detail.id, detail);
    }
}

fn lookup_error(id: PostId, message: &str) -> WatchError {
    WatchError::Lookup {
        id,
        message: message.to_string(),
    }
}
