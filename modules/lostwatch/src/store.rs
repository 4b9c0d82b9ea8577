use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use lostwatch_common::{
    LostRecord, PostId, Result, SuspectRecord, TrackedPost, WatchError, Watermark,
};

use crate::traits::{TrackerStore, WatermarkStore};

/// Minutes after which a run lock is considered abandoned.
const LOCK_STALE_MINUTES: i32 = 30;

/// Postgres-backed tracker and watermark store.
///
/// Each instance holds locks under its own owner token, so it can only
/// release locks it acquired itself.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    owner: String,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Run the embedded SQL migrations. A failed migration needs an operator,
    /// so it is not reported as a retryable store error.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::Error::new(e).context("applying store migrations"))?;
        info!("Store migrations applied");
        Ok(())
    }
}

fn store_err(e: sqlx::Error) -> WatchError {
    WatchError::Store(e.to_string())
}

#[async_trait]
impl TrackerStore for PgStore {
    async fn suspects(&self) -> Result<Vec<SuspectRecord>> {
        let rows = sqlx::query_as::<_, (Json<TrackedPost>, Option<DateTime<Utc>>)>(
            "SELECT post, first_seen_at FROM suspect_posts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(Json(post), first_seen_at)| SuspectRecord {
                post,
                first_seen_at,
            })
            .collect())
    }

    async fn lost(&self) -> Result<Vec<LostRecord>> {
        let rows = sqlx::query_as::<_, (Json<TrackedPost>, DateTime<Utc>)>(
            "SELECT post, lost_since FROM lost_posts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(Json(post), lost_since)| LostRecord { post, lost_since })
            .collect())
    }

    async fn upsert_suspects(&self, records: &[SuspectRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for record in records {
            sqlx::query(
                "INSERT INTO suspect_posts (id, post, first_seen_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id)
                 DO UPDATE SET post = EXCLUDED.post,
                               first_seen_at = COALESCE(suspect_posts.first_seen_at, EXCLUDED.first_seen_at),
                               updated_at = now()",
            )
            .bind(record.id())
            .bind(Json(&record.post))
            .bind(record.first_seen_at)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        debug!(count = records.len(), "Upserted suspects");
        Ok(())
    }

    async fn delete_suspects(&self, ids: &[PostId]) -> Result<()> {
        sqlx::query("DELETE FROM suspect_posts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_lost(&self, records: &[LostRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for record in records {
            // An existing row keeps its original lost_since.
            sqlx::query(
                "INSERT INTO lost_posts (id, post, lost_since)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id())
            .bind(Json(&record.post))
            .bind(record.lost_since)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        debug!(count = records.len(), "Upserted lost posts");
        Ok(())
    }

    async fn delete_lost(&self, ids: &[PostId]) -> Result<()> {
        sqlx::query("DELETE FROM lost_posts WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn acquire_lock(&self, name: &str) -> Result<bool> {
        sqlx::query(
            "DELETE FROM watch_locks
             WHERE name = $1 AND acquired_at < now() - make_interval(mins => $2)",
        )
        .bind(name)
        .bind(LOCK_STALE_MINUTES)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let result = sqlx::query(
            "INSERT INTO watch_locks (name, owner) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(&self.owner)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM watch_locks WHERE name = $1 AND owner = $2")
            .bind(name)
            .bind(&self.owner)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            debug!(name, "Lock not held by this process, left in place");
        }
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for PgStore {
    async fn get(&self) -> Result<Option<Watermark>> {
        let row = sqlx::query_as::<_, (PostId, DateTime<Utc>)>(
            "SELECT last_confirmed_old_id, creation_time FROM watermark WHERE singleton",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|(last_confirmed_old_id, creation_time)| Watermark {
            last_confirmed_old_id,
            creation_time,
        }))
    }

    async fn advance_if_newer(&self, id: PostId, creation_time: DateTime<Utc>) -> Result<()> {
        // The WHERE clause keeps the stored id monotonic under concurrent writers.
        sqlx::query(
            "INSERT INTO watermark (singleton, last_confirmed_old_id, creation_time)
             VALUES (TRUE, $1, $2)
             ON CONFLICT (singleton)
             DO UPDATE SET last_confirmed_old_id = EXCLUDED.last_confirmed_old_id,
                           creation_time = EXCLUDED.creation_time,
                           updated_at = now()
             WHERE watermark.last_confirmed_old_id < EXCLUDED.last_confirmed_old_id",
        )
        .bind(id)
        .bind(creation_time)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM watermark")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
