//! Feed types for feedvault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datetime::format_utc_datetime;
use crate::{Result, VaultError};

/// Maximum accepted length of a source identifier.
pub const MAX_SOURCE_ID_LENGTH: usize = 2048;

/// Number of stories per source in the overview.
pub const OVERVIEW_STORIES_TOTAL: u64 = 10;

/// One syndicated entry as retrieved from a source.
///
/// Items are immutable once created; the stored form is the serialized
/// payload produced by [`crate::feed::codec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Item title.
    pub title: String,
    /// Link to the original article.
    #[serde(default)]
    pub link: String,
    /// Description with markup stripped.
    #[serde(default)]
    pub description: String,
    /// Source-supplied publish time.
    pub published_at: DateTime<Utc>,
}

impl FeedItem {
    /// Create a new item with an empty link and description.
    pub fn new(title: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            link: String::new(),
            description: String::new(),
            published_at,
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Sort a fetched batch newest-first; upstream order is not trusted.
///
/// The sort is stable, so items sharing a timestamp keep their upstream order.
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

/// How story publish times are rendered for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryFormat {
    /// IANA timezone name.
    pub timezone: String,
    /// chrono format string.
    pub time_format: String,
}

impl Default for StoryFormat {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            time_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

/// The caller-facing projection of a stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Story {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Publish time formatted for display.
    pub pub_time: String,
    /// Publish time, for callers that merge stories from several sources.
    pub published_at: DateTime<Utc>,
}

impl Story {
    /// Project an item into a story.
    pub fn from_item(item: &FeedItem, format: &StoryFormat) -> Self {
        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            description: item.description.clone(),
            pub_time: format_utc_datetime(&item.published_at, &format.timezone, &format.time_format),
            published_at: item.published_at,
        }
    }
}

/// Registered sources together with their latest stories, newest first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overview {
    pub source_ids: Vec<String>,
    pub stories: Vec<Story>,
}

/// Reject identifiers that cannot name a source.
pub fn validate_source_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(VaultError::Validation(
            "source identifier must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_SOURCE_ID_LENGTH {
        return Err(VaultError::Validation(format!(
            "source identifier too long: {} bytes (max {})",
            id.len(),
            MAX_SOURCE_ID_LENGTH
        )));
    }
    Ok(())
}
