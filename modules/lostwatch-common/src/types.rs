use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned post id. Roughly increasing with creation order, but
/// edits and feed ordering mean it is not strictly monotonic.
pub type PostId = i64;

// --- Rank tags ---

/// Author rank tier, ordered from lowest to highest.
///
/// `Admin` is an administrative tag rather than a rating tier; it sorts
/// above every tier so admin posts always pass a rank threshold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RankTag {
    Unrated,
    Newbie,
    Pupil,
    Specialist,
    Expert,
    CandidateMaster,
    Master,
    Grandmaster,
    LegendaryGrandmaster,
    Admin,
}

impl RankTag {
    /// Map a rendered author color class (`user-red`, `user-admin`, ...) to a tag.
    ///
    /// Colors are coarser than tiers: orange covers both master tiers and red
    /// both grandmaster tiers, so this resolves to the lower tier of each.
    pub fn from_color_class(class: &str) -> Self {
        match class.trim().trim_start_matches("user-") {
            "gray" => Self::Newbie,
            "green" => Self::Pupil,
            "cyan" => Self::Specialist,
            "blue" => Self::Expert,
            "violet" => Self::CandidateMaster,
            "orange" => Self::Master,
            "red" => Self::Grandmaster,
            "legendary" => Self::LegendaryGrandmaster,
            "admin" | "black" => Self::Admin,
            _ => Self::Unrated,
        }
    }

    /// Map a rank name as reported by the rank authority.
    pub fn from_rank_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "newbie" => Self::Newbie,
            "pupil" => Self::Pupil,
            "specialist" => Self::Specialist,
            "expert" => Self::Expert,
            "candidate master" => Self::CandidateMaster,
            "master" | "international master" => Self::Master,
            "grandmaster" | "international grandmaster" => Self::Grandmaster,
            "legendary grandmaster" => Self::LegendaryGrandmaster,
            "headquarters" | "admin" => Self::Admin,
            _ => Self::Unrated,
        }
    }

    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unrated => "unrated",
            Self::Newbie => "newbie",
            Self::Pupil => "pupil",
            Self::Specialist => "specialist",
            Self::Expert => "expert",
            Self::CandidateMaster => "candidate_master",
            Self::Master => "master",
            Self::Grandmaster => "grandmaster",
            Self::LegendaryGrandmaster => "legendary_grandmaster",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for RankTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankTag {
    type Err = String;

    /// Accepts the snake_case form (`candidate_master`) or the rank name
    /// with spaces (`candidate master`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        if normalized == "unrated" {
            return Ok(Self::Unrated);
        }
        match Self::from_rank_name(&normalized) {
            Self::Unrated => Err(format!("unknown rank: {s}")),
            tag => Ok(tag),
        }
    }
}

// --- Feed and detail types ---

/// A post as listed by the feed. Cheap to obtain, but carries no
/// authoritative creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct PostStub {
    pub id: PostId,
    pub author_handle: String,
    pub rank_tag: RankTag,
    pub title: String,
    pub is_low_rated: bool,
}

/// Authoritative per-post data from the detail lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDetail {
    pub id: PostId,
    pub creation_time: DateTime<Utc>,
    pub title: String,
    pub author_handle: String,
}

/// Stub and detail merged; the shape persisted for tracked posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPost {
    pub id: PostId,
    pub author_handle: String,
    pub rank_tag: RankTag,
    pub title: String,
    pub creation_time: DateTime<Utc>,
    pub is_low_rated: bool,
}

impl TrackedPost {
    pub fn merge(stub: &PostStub, detail: &PostDetail) -> Self {
        let title = if detail.title.is_empty() {
            stub.title.clone()
        } else {
            detail.title.clone()
        };
        Self {
            id: stub.id,
            author_handle: detail.author_handle.clone(),
            rank_tag: stub.rank_tag,
            title,
            creation_time: detail.creation_time,
            is_low_rated: stub.is_low_rated,
        }
    }
}

/// A post believed new and rank-eligible that has not yet dropped out of the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspectRecord {
    pub post: TrackedPost,
    /// `None` for records written before first-seen tracking existed.
    pub first_seen_at: Option<DateTime<Utc>>,
}

impl SuspectRecord {
    pub fn id(&self) -> PostId {
        self.post.id
    }
}

/// A suspect that left the feed while still inside its relevance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LostRecord {
    pub post: TrackedPost,
    pub lost_since: DateTime<Utc>,
}

impl LostRecord {
    pub fn id(&self) -> PostId {
        self.post.id
    }
}

/// Highest post id known to be outside the new window, with its creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_confirmed_old_id: PostId,
    pub creation_time: DateTime<Utc>,
}

// --- Time windows ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Posts younger than this are "new".
    pub new_window: Duration,
    /// Lost records older than this are purged.
    pub retention_window: Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            new_window: Duration::hours(24),
            retention_window: Duration::days(7),
        }
    }
}

impl WindowPolicy {
    pub fn is_new(&self, creation_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - creation_time < self.new_window
    }

    pub fn is_expired(&self, lost_since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - lost_since > self.retention_window
    }

    /// A stored watermark is only usable while it still describes a not-new post.
    pub fn watermark_holds(&self, watermark: &Watermark, now: DateTime<Utc>) -> bool {
        !self.is_new(watermark.creation_time, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_tags_are_ordered_by_tier() {
        assert!(RankTag::Unrated < RankTag::Newbie);
        assert!(RankTag::Expert < RankTag::CandidateMaster);
        assert!(RankTag::LegendaryGrandmaster < RankTag::Admin);
    }

    #[test]
    fn color_classes_map_to_tiers() {
        assert_eq!(RankTag::from_color_class("user-blue"), RankTag::Expert);
        assert_eq!(RankTag::from_color_class("user-legendary"), RankTag::LegendaryGrandmaster);
        assert_eq!(RankTag::from_color_class("user-admin"), RankTag::Admin);
        assert_eq!(RankTag::from_color_class("user-black"), RankTag::Admin);
        assert_eq!(RankTag::from_color_class("mystery"), RankTag::Unrated);
    }

    #[test]
    fn rank_names_fold_international_tiers() {
        assert_eq!(RankTag::from_rank_name("international master"), RankTag::Master);
        assert_eq!(RankTag::from_rank_name("International Grandmaster"), RankTag::Grandmaster);
        assert_eq!(RankTag::from_rank_name("candidate master"), RankTag::CandidateMaster);
    }

    #[test]
    fn parses_config_rank_forms() {
        assert_eq!("candidate_master".parse::<RankTag>().unwrap(), RankTag::CandidateMaster);
        assert_eq!("Expert".parse::<RankTag>().unwrap(), RankTag::Expert);
        assert_eq!("unrated".parse::<RankTag>().unwrap(), RankTag::Unrated);
        assert!("wizard".parse::<RankTag>().is_err());
    }

    #[test]
    fn window_boundaries() {
        let policy = WindowPolicy::default();
        let now = Utc::now();
        assert!(policy.is_new(now - Duration::hours(23), now));
        assert!(!policy.is_new(now - Duration::hours(24), now));
        assert!(!policy.is_expired(now - Duration::days(7), now));
        assert!(policy.is_expired(now - Duration::days(8), now));
    }

    #[test]
    fn watermark_fails_once_window_grows_past_it() {
        let now = Utc::now();
        let watermark = Watermark {
            last_confirmed_old_id: 90,
            creation_time: now - Duration::hours(30),
        };
        assert!(WindowPolicy::default().watermark_holds(&watermark, now));

        let longer = WindowPolicy {
            new_window: Duration::hours(48),
            ..WindowPolicy::default()
        };
        assert!(!longer.watermark_holds(&watermark, now));
    }
}
