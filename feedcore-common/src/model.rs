//! Core data model shared by every pipeline stage: the normalized item that
//! comes out of the Source Client, and the type/priority tags the
//! Classifier attaches to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of tags carried by an [`Item`].
pub const MAX_TAGS: usize = 10;

/// A normalized inbound record, already translated out of whatever shape
/// the upstream reader API used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique per upstream source; the record's primary identity.
    pub source_id: String,
    /// ≤255 chars.
    pub title: String,
    /// ≤2000 chars.
    pub brief: String,
    /// Absolute http(s) URL, ≤2048 chars.
    pub url: String,
    pub published_at: DateTime<Utc>,
    /// ≤99 chars when present.
    pub author: Option<String>,
    /// Ordered, ≤[`MAX_TAGS`] entries, each ≤50 chars.
    pub tags: Vec<String>,
    /// Opaque attributes consulted by the Classifier (likes, shares,
    /// video_url, categories, ...). Not interpreted by the queue or
    /// deliverer.
    #[serde(default)]
    pub signals: serde_json::Map<String, serde_json::Value>,
}

impl Item {
    /// `true` if every structural constraint in the data model holds.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.source_id.is_empty()
            && self.title.chars().count() <= 255
            && self.brief.chars().count() <= 2000
            && self.url.chars().count() <= 2048
            && (self.url.starts_with("http://") || self.url.starts_with("https://"))
            && self
                .author
                .as_ref()
                .is_none_or(|author| author.chars().count() <= 99)
            && self.tags.len() <= MAX_TAGS
            && self.tags.iter().all(|tag| tag.chars().count() <= 50)
    }

    /// Best-effort host extraction, used by the Classifier's URL-based
    /// content-type rules. Returns an empty string on an unparsable URL
    /// rather than failing — classification degrades gracefully to BLOG.
    #[must_use]
    pub fn url_host(&self) -> &str {
        let without_scheme = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
    }
}

/// Content-type tag computed by the Classifier.
///
/// Represented as a single value internally; the Webhook Deliverer wraps it
/// in a one-element list at the wire boundary, since the downstream sink's
/// schema is list-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Blog,
    Video,
    Social,
    News,
    General,
}

impl ContentType {
    /// All variants, in no particular order; used to validate the webhook
    /// wire payload's list-valued content-type field.
    pub const ALL: [Self; 5] = [
        Self::Blog,
        Self::Video,
        Self::Social,
        Self::News,
        Self::General,
    ];
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Blog => "BLOG",
            Self::Video => "VIDEO",
            Self::Social => "SOCIAL",
            Self::News => "NEWS",
            Self::General => "GENERAL",
        };
        f.write_str(name)
    }
}

/// Delivery priority, with a total order: `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: &str) -> Item {
        Item {
            source_id: "abc".to_string(),
            title: "title".to_string(),
            brief: "brief".to_string(),
            url: url.to_string(),
            published_at: Utc::now(),
            author: None,
            tags: vec![],
            signals: serde_json::Map::new(),
        }
    }

    #[test]
    fn priority_total_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::Low < Priority::High);
    }

    #[test]
    fn well_formed_item_passes() {
        assert!(item("https://example.com/a").is_well_formed());
    }

    #[test]
    fn item_with_bad_url_scheme_fails() {
        assert!(!item("ftp://example.com/a").is_well_formed());
    }

    #[test]
    fn item_with_too_many_tags_fails() {
        let mut it = item("https://example.com/a");
        it.tags = (0..MAX_TAGS + 1).map(|n| n.to_string()).collect();
        assert!(!it.is_well_formed());
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        let it = item("https://www.youtube.com/watch?v=xyz");
        assert_eq!(it.url_host(), "www.youtube.com");
    }

    #[test]
    fn url_host_on_malformed_url_is_empty() {
        let it = item("not-a-url");
        assert_eq!(it.url_host(), "");
    }

    #[test]
    fn content_type_display_matches_wire_name() {
        assert_eq!(ContentType::Video.to_string(), "VIDEO");
    }
}
