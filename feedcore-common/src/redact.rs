//! Redaction of sensitive substrings before logging or external records.

use std::sync::LazyLock;

use regex::Regex;

static SENSITIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api_key|token|password)=([^\s&]+)").expect("redaction pattern is valid")
});

/// Replace `api_key=...`, `token=...`, and `password=...` (case-insensitive,
/// in any order) with `key=[REDACTED]` so secrets never reach a log line
/// or an `ErrorContext`.
#[must_use]
pub fn redact(input: &str) -> String {
    SENSITIVE.replace_all(input, "$1=[REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key() {
        let redacted = redact("failed request: api_key=SECRET123 rejected");
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("SECRET123"));
    }

    #[test]
    fn redacts_token_and_password() {
        let redacted = redact("token=abc123&password=hunter2");
        assert_eq!(redacted, "token=[REDACTED]&password=[REDACTED]");
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let redacted = redact("connection refused to upstream.example.com");
        assert_eq!(redacted, "connection refused to upstream.example.com");
    }

    #[test]
    fn is_case_insensitive() {
        let redacted = redact("API_KEY=abc TOKEN=def");
        assert!(!redacted.contains("abc"));
        assert!(!redacted.contains("def"));
    }
}
