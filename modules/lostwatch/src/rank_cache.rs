use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use lostwatch_common::{RankTag, Result};

use crate::traits::RankAuthority;

/// Values that go stale after a fixed time-to-live.
pub struct ExpiringCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (V, DateTime<Utc>)>,
}

impl<K: Eq + Hash, V: Clone> ExpiringCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The cached value, if it was stored less than `ttl` before `now`.
    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        self.entries
            .get(key)
            .filter(|(_, stored_at)| now - *stored_at < self.ttl)
            .map(|(value, _)| value.clone())
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(key, (value, now));
    }

    /// Drop expired entries.
    pub fn purge(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored_at)| now - *stored_at < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rank authority that remembers answers across runs and only asks the
/// inner authority about handles it has no fresh rank for.
pub struct CachedRankAuthority {
    inner: Arc<dyn RankAuthority>,
    cache: Mutex<ExpiringCache<String, RankTag>>,
}

impl CachedRankAuthority {
    pub fn new(inner: Arc<dyn RankAuthority>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Mutex::new(ExpiringCache::new(ttl)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExpiringCache<String, RankTag>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RankAuthority for CachedRankAuthority {
    async fn current_rank_tags(&self, handles: &[String]) -> Result<HashMap<String, RankTag>> {
        let now = Utc::now();
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let mut cache = self.lock();
            cache.purge(now);
            for handle in handles {
                match cache.get(handle, now) {
                    Some(tag) => {
                        found.insert(handle.clone(), tag);
                    }
                    None => missing.push(handle.clone()),
                }
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }

        debug!(cached = found.len(), missing = missing.len(), "Refreshing rank cache");
        let fetched = self.inner.current_rank_tags(&missing).await?;

        let mut cache = self.lock();
        for (handle, tag) in fetched {
            cache.insert(handle.clone(), tag, now);
            found.insert(handle, tag);
        }
        Ok(found)
    }
}
