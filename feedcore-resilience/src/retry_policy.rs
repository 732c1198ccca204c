//! Per-category retry budgets consulted by the Error Handler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCategory;

/// Maximum retry attempts, keyed by [`ErrorCategory`]. Authoritative over
/// any retry-count knob configured directly on a caller (e.g. the Webhook
/// Deliverer's own `max_retries` field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    by_category: HashMap<ErrorCategory, u32>,
    default_max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let mut by_category = HashMap::new();
        by_category.insert(ErrorCategory::RateLimit, 5);
        by_category.insert(ErrorCategory::Network, 3);
        by_category.insert(ErrorCategory::Server, 3);
        by_category.insert(ErrorCategory::Api, 3);
        by_category.insert(ErrorCategory::Delivery, 3);
        by_category.insert(ErrorCategory::Processing, 0);
        by_category.insert(ErrorCategory::System, 0);
        by_category.insert(ErrorCategory::Validation, 0);
        by_category.insert(ErrorCategory::Client, 0);
        by_category.insert(ErrorCategory::Authentication, 0);
        Self {
            by_category,
            default_max_retries: 3,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum retries permitted for `category`.
    #[must_use]
    pub fn max_retries(&self, category: ErrorCategory) -> u32 {
        self.by_category
            .get(&category)
            .copied()
            .unwrap_or(self.default_max_retries)
    }

    /// Override the retry count for a category.
    pub fn set(&mut self, category: ErrorCategory, max_retries: u32) {
        self.by_category.insert(category, max_retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_never_retries() {
        assert_eq!(RetryPolicy::default().max_retries(ErrorCategory::Validation), 0);
    }

    #[test]
    fn override_changes_only_that_category() {
        let mut policy = RetryPolicy::default();
        policy.set(ErrorCategory::Network, 10);
        assert_eq!(policy.max_retries(ErrorCategory::Network), 10);
        assert_eq!(policy.max_retries(ErrorCategory::Server), 3);
    }
}
