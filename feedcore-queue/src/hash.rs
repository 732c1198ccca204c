//! Content hashing used by the dedup index.
//!
//! The hash must be stable regardless of the order in which an [`Item`]'s
//! nested `signals` map was populated, so every object is rebuilt with its
//! keys sorted before serialization.

use feedcore_common::Item;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 256-bit content digest of a canonicalized [`Item`].
pub type ContentHash = [u8; 32];

/// Recursively rebuild `value` so every object's keys are in sorted order.
///
/// `serde_json::Map` is a `BTreeMap` by default (the workspace does not
/// enable the `preserve_order` feature), so this is mostly a defensive
/// measure: it keeps the hash stable even if that default ever changes.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compute the content hash of an item: canonicalize its JSON representation
/// (sorted object keys, recursively) and SHA-256 the UTF-8 bytes.
#[must_use]
pub fn content_hash(item: &Item) -> ContentHash {
    let value = serde_json::to_value(item).unwrap_or(Value::Null);
    let canonical = canonicalize(&value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item_with_signals(signals: serde_json::Map<String, Value>) -> Item {
        Item {
            source_id: "abc".to_string(),
            title: "title".to_string(),
            brief: "brief".to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc::now(),
            author: None,
            tags: vec![],
            signals,
        }
    }

    #[test]
    fn hash_is_stable_under_key_reorder() {
        let mut a = serde_json::Map::new();
        a.insert("likes".to_string(), Value::from(10));
        a.insert("shares".to_string(), Value::from(2));

        let mut b = serde_json::Map::new();
        b.insert("shares".to_string(), Value::from(2));
        b.insert("likes".to_string(), Value::from(10));

        assert_eq!(
            content_hash(&item_with_signals(a)),
            content_hash(&item_with_signals(b))
        );
    }

    #[test]
    fn hash_differs_on_different_content() {
        let mut a = serde_json::Map::new();
        a.insert("likes".to_string(), Value::from(10));
        let mut b = serde_json::Map::new();
        b.insert("likes".to_string(), Value::from(11));

        assert_ne!(
            content_hash(&item_with_signals(a)),
            content_hash(&item_with_signals(b))
        );
    }
}
