use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Envelope wrapping every API response.
///
/// `status` is `"OK"` with a populated `result`, or `"FAILED"` with a
/// human-readable `comment`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub comment: Option<String>,
    pub result: Option<T>,
}

/// One entry of the recent actions feed. Comment-only actions carry no
/// blog entry and are skipped by consumers.
#[derive(Debug, Clone, Deserialize)]
pub struct RecentAction {
    #[serde(rename = "timeSeconds")]
    pub time_seconds: i64,
    #[serde(rename = "blogEntry")]
    pub blog_entry: Option<BlogEntry>,
    /// Author color class as rendered by the site (`user-red`, `user-admin`, ...).
    /// Only mirrors that proxy the rendered feed populate this.
    #[serde(rename = "authorColor", default)]
    pub author_color: Option<String>,
}

/// A blog entry as returned by `recentActions` and `blogEntry.view`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlogEntry {
    pub id: i64,
    #[serde(rename = "originalLocale")]
    pub original_locale: Option<String>,
    #[serde(rename = "creationTimeSeconds")]
    pub creation_time_seconds: i64,
    #[serde(rename = "authorHandle")]
    pub author_handle: String,
    pub title: String,
    pub locale: Option<String>,
    #[serde(rename = "modificationTimeSeconds")]
    pub modification_time_seconds: Option<i64>,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BlogEntry {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.creation_time_seconds, 0).single()
    }

    /// Title with markup stripped. The API wraps titles in `<p>` tags and
    /// escapes a handful of entities.
    pub fn plain_title(&self) -> String {
        strip_markup(&self.title)
    }
}

/// A user as returned by `user.info`.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub handle: String,
    /// Rank name, e.g. `"expert"` or `"legendary grandmaster"`. Absent for unrated users.
    pub rank: Option<String>,
    pub rating: Option<i64>,
}

fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
