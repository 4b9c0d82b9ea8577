use std::env;
use std::str::FromStr;

use chrono::Duration;
use tracing::info;

use crate::error::{Result, WatchError};
use crate::types::{RankTag, WindowPolicy};

/// Longest accepted scheduler interval, one week.
const MAX_RUN_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Feed endpoints
    pub feed_base_url: String,
    pub feed_mirror_url: Option<String>,
    pub locale: String,

    // Classification
    pub min_rank: RankTag,
    pub new_window_hours: i64,
    pub retention_days: i64,
    pub normalize_ranks: bool,

    // Scheduling and resources
    pub run_interval_minutes: u64,
    pub detail_concurrency: usize,
    pub rank_cache_ttl_minutes: i64,

    // Notifications
    pub slack_webhook_url: Option<String>,

    // Derived from the raw values above, range-checked at load time
    policy: WindowPolicy,
    run_interval: std::time::Duration,
    cache_ttl: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url =
            get("DATABASE_URL").ok_or_else(|| missing("DATABASE_URL"))?;

        let new_window_hours = parse_or("NEW_WINDOW_HOURS", get("NEW_WINDOW_HOURS"), 24)?;
        let retention_days = parse_or("RETENTION_DAYS", get("RETENTION_DAYS"), 7)?;
        let run_interval_minutes =
            parse_or("RUN_INTERVAL_MINUTES", get("RUN_INTERVAL_MINUTES"), 10)?;
        let rank_cache_ttl_minutes =
            parse_or("RANK_CACHE_TTL_MINUTES", get("RANK_CACHE_TTL_MINUTES"), 60)?;
        let detail_concurrency = parse_or("DETAIL_CONCURRENCY", get("DETAIL_CONCURRENCY"), 4)?;
        if detail_concurrency == 0 {
            return Err(WatchError::Config("DETAIL_CONCURRENCY must be positive".into()));
        }

        let policy = WindowPolicy {
            new_window: positive_duration("NEW_WINDOW_HOURS", new_window_hours, Duration::try_hours)?,
            retention_window: positive_duration("RETENTION_DAYS", retention_days, Duration::try_days)?,
        };
        let run_interval = interval_from_minutes(run_interval_minutes)?;
        let cache_ttl = Duration::try_minutes(rank_cache_ttl_minutes.max(0))
            .ok_or_else(|| out_of_range("RANK_CACHE_TTL_MINUTES"))?;

        Ok(Self {
            database_url,
            feed_base_url: get("FEED_BASE_URL")
                .unwrap_or_else(|| "https://codeforces.com/api".to_string()),
            feed_mirror_url: get("FEED_MIRROR_URL"),
            locale: get("FEED_LOCALE").unwrap_or_else(|| "en".to_string()),
            min_rank: parse_or("MIN_RANK", get("MIN_RANK"), RankTag::Expert)?,
            new_window_hours,
            retention_days,
            normalize_ranks: parse_or("NORMALIZE_RANKS", get("NORMALIZE_RANKS"), true)?,
            run_interval_minutes,
            detail_concurrency,
            rank_cache_ttl_minutes,
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            policy,
            run_interval,
            cache_ttl,
        })
    }

    pub fn window_policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Time between scheduled runs.
    pub fn run_interval(&self) -> std::time::Duration {
        self.run_interval
    }

    pub fn rank_cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Log the effective configuration without credentials.
    pub fn log_redacted(&self) {
        info!(
            database_url = %redact_url(&self.database_url),
            feed_base_url = %self.feed_base_url,
            feed_mirror_url = self.feed_mirror_url.as_deref().unwrap_or("-"),
            locale = %self.locale,
            min_rank = %self.min_rank,
            new_window_hours = self.new_window_hours,
            retention_days = self.retention_days,
            normalize_ranks = self.normalize_ranks,
            run_interval_minutes = self.run_interval_minutes,
            detail_concurrency = self.detail_concurrency,
            slack = self.slack_webhook_url.is_some(),
            "Loaded configuration"
        );
    }
}

fn missing(key: &str) -> WatchError {
    WatchError::Config(format!("{key} environment variable is required"))
}

fn out_of_range(key: &str) -> WatchError {
    WatchError::Config(format!("{key} is out of range"))
}

fn positive_duration(
    key: &str,
    value: i64,
    make: fn(i64) -> Option<Duration>,
) -> Result<Duration> {
    if value <= 0 {
        return Err(WatchError::Config(format!("{key} must be positive")));
    }
    make(value).ok_or_else(|| out_of_range(key))
}

fn interval_from_minutes(minutes: u64) -> Result<std::time::Duration> {
    if minutes == 0 {
        return Err(WatchError::Config("RUN_INTERVAL_MINUTES must be positive".into()));
    }
    if minutes > MAX_RUN_INTERVAL_MINUTES {
        return Err(out_of_range("RUN_INTERVAL_MINUTES"));
    }
    let secs = minutes
        .checked_mul(60)
        .ok_or_else(|| out_of_range("RUN_INTERVAL_MINUTES"))?;
    Ok(std::time::Duration::from_secs(secs))
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| WatchError::Config(format!("{key} has invalid value {v:?}"))),
    }
}

/// Replace the password portion of a connection URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((creds, host)) => {
            let user = creds.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => url.to_string(),
    }
}
