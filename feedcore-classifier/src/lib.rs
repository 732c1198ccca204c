//! Pure content-type and priority classification.
//!
//! `classify` takes an [`Item`] and a [`ClassifierConfig`] and returns a
//! `(ContentType, Priority)` pair. It does no I/O and consults only the
//! item's own fields — the same item classified twice always yields the
//! same result.

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use feedcore_common::{ContentType, Item, Priority};
use serde::{Deserialize, Serialize};

/// Tags that, when present on an item (case-insensitive), force
/// `Priority::High` regardless of the computed score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    breaking_tags: AHashSet<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            breaking_tags: ["breaking", "breaking-news", "urgent"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl ClassifierConfig {
    #[must_use]
    pub fn new(breaking_tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            breaking_tags: breaking_tags.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn has_breaking_tag(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|tag| self.breaking_tags.contains(&tag.to_lowercase()))
    }
}

fn signals_has_any(item: &Item, keys: &[&str]) -> bool {
    keys.iter().any(|key| item.signals.contains_key(*key))
}

fn host_contains_any(host: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| host.contains(needle))
}

fn classify_content_type(item: &Item) -> ContentType {
    if signals_has_any(item, &["video_url", "youtube_id", "vimeo_id"]) {
        return ContentType::Video;
    }
    let host = item.url_host();
    if host_contains_any(host, &["youtube.com", "vimeo.com", "dailymotion.com"]) {
        return ContentType::Video;
    }
    if signals_has_any(item, &["social_signals", "likes", "shares"]) {
        return ContentType::Social;
    }
    if host_contains_any(
        host,
        &["twitter.com", "facebook.com", "linkedin.com", "instagram.com"],
    ) {
        return ContentType::Social;
    }
    if signals_has_any(item, &["news_score", "article_text"]) {
        return ContentType::News;
    }
    ContentType::Blog
}

fn signal_as_i64(item: &Item, key: &str) -> Option<i64> {
    item.signals.get(key).and_then(serde_json::Value::as_i64)
}

fn score_priority(item: &Item, content_type: ContentType, now: DateTime<Utc>) -> i32 {
    let mut score = 5;

    if let Some(likes) = signal_as_i64(item, "likes") {
        if likes > 1000 {
            score += 1;
        }
        if likes > 5000 {
            score += 1;
        }
    }

    if let Some(shares) = signal_as_i64(item, "shares") {
        if shares > 500 {
            score += 1;
        }
        if shares > 2000 {
            score += 1;
        }
    }

    if let Some(comments) = signal_as_i64(item, "comments") {
        if comments > 100 {
            score += 1;
        }
    }

    match content_type {
        ContentType::Video => score += 2,
        ContentType::News | ContentType::Social => score += 1,
        ContentType::Blog | ContentType::General => {}
    }

    let age = now.signed_duration_since(item.published_at);
    if age <= chrono::Duration::hours(1) {
        score += 2;
    } else if age <= chrono::Duration::hours(6) {
        score += 1;
    }

    score.clamp(1, 10)
}

fn priority_from_score(score: i32) -> Priority {
    match score {
        i32::MIN..=3 => Priority::Low,
        4..=7 => Priority::Normal,
        _ => Priority::High,
    }
}

/// Classify `item` using `now` as the reference time for recency scoring.
/// Exposed separately from [`classify`] so tests don't depend on wall-clock
/// time.
#[must_use]
pub fn classify_at(item: &Item, config: &ClassifierConfig, now: DateTime<Utc>) -> (ContentType, Priority) {
    let content_type = classify_content_type(item);

    if config.has_breaking_tag(&item.tags) {
        return (content_type, Priority::High);
    }

    let score = score_priority(item, content_type, now);
    (content_type, priority_from_score(score))
}

/// Classify `item` against the current wall-clock time.
#[must_use]
pub fn classify(item: &Item, config: &ClassifierConfig) -> (ContentType, Priority) {
    classify_at(item, config, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn base_item() -> Item {
        Item {
            source_id: "abc".to_string(),
            title: "title".to_string(),
            brief: "brief".to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc::now() - chrono::Duration::days(1),
            author: None,
            tags: vec![],
            signals: Map::new(),
        }
    }

    fn with_signal(mut item: Item, key: &str, value: impl Into<Value>) -> Item {
        item.signals.insert(key.to_string(), value.into());
        item
    }

    #[test]
    fn video_url_signal_wins() {
        let item = with_signal(base_item(), "video_url", "https://cdn.example.com/v.mp4");
        let (content_type, _) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Video);
    }

    #[test]
    fn youtube_host_is_video_even_without_signals() {
        let mut item = base_item();
        item.url = "https://www.youtube.com/watch?v=xyz".to_string();
        let (content_type, _) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Video);
    }

    #[test]
    fn social_signals_beat_news_rules() {
        let item = with_signal(base_item(), "likes", 10);
        let (content_type, _) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Social);
    }

    #[test]
    fn twitter_host_is_social() {
        let mut item = base_item();
        item.url = "https://twitter.com/user/status/1".to_string();
        let (content_type, _) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Social);
    }

    #[test]
    fn news_score_signal_is_news() {
        let item = with_signal(base_item(), "news_score", 0.9);
        let (content_type, _) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::News);
    }

    #[test]
    fn default_falls_back_to_blog() {
        let (content_type, _) = classify(&base_item(), &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Blog);
    }

    #[test]
    fn baseline_score_is_normal() {
        let item = base_item();
        let (_, priority) = classify(&item, &ClassifierConfig::default());
        assert_eq!(priority, Priority::Normal);
    }

    #[test]
    fn high_engagement_pushes_to_high() {
        let mut item = with_signal(base_item(), "likes", 6000);
        item.signals.insert("shares".to_string(), Value::from(3000));
        item.signals.insert("comments".to_string(), Value::from(200));
        let (_, priority) = classify(&item, &ClassifierConfig::default());
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn recent_video_pushes_score_to_high() {
        let mut item = with_signal(base_item(), "video_url", "https://cdn.example.com/v.mp4");
        item.published_at = Utc::now();
        let (content_type, priority) = classify(&item, &ClassifierConfig::default());
        assert_eq!(content_type, ContentType::Video);
        // baseline 5 + video (2) + recency-within-1h (2) = 9 -> High.
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn breaking_tag_forces_high_regardless_of_score() {
        let mut item = base_item();
        item.tags = vec!["Breaking".to_string()];
        item.published_at = Utc::now() - chrono::Duration::days(30);
        let (_, priority) = classify(&item, &ClassifierConfig::default());
        assert_eq!(priority, Priority::High);
    }

    #[test]
    fn low_engagement_old_item_never_exceeds_baseline_normal() {
        // The score is purely additive starting at 5, so a plain item
        // with no bonuses never dips below Normal; LOW priority
        // is only assigned explicitly elsewhere (e.g. requeue on retry).
        let mut item = base_item();
        item.published_at = Utc::now() - chrono::Duration::days(30);
        let (_, priority) = classify(&item, &ClassifierConfig::default());
        assert_eq!(priority, Priority::Normal);
    }

    #[test]
    fn score_clamps_within_bounds() {
        let mut item = with_signal(base_item(), "likes", 999_999);
        item.signals.insert("shares".to_string(), Value::from(999_999));
        item.signals.insert("comments".to_string(), Value::from(999_999));
        item.published_at = Utc::now();
        let (content_type, priority) = classify_at(&item, &ClassifierConfig::default(), Utc::now());
        assert_eq!(content_type, ContentType::Social);
        assert_eq!(priority, Priority::High);
    }
}
