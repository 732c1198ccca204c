//! Service-name newtype for type safety
//!
//! Wraps the name used to key rate limiters, circuit breakers, and error
//! handler configs so call sites can't accidentally pass an arbitrary
//! string (a URL, an item id) where a service/endpoint identifier is
//! expected. `#[repr(transparent)]` keeps this a zero-cost abstraction.
//!
//! # Examples
//!
//! ```
//! use feedcore_common::ServiceName;
//!
//! let service = ServiceName::new("webhook-sink");
//! assert_eq!(service.as_str(), "webhook-sink");
//!
//! let service: ServiceName = "source-reader".into();
//! assert_eq!(service.as_str(), "source-reader");
//! ```

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Identifies a named external dependency (source reader, webhook sink)
/// with its own circuit breaker, rate limiter, and retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Create a new `ServiceName` from any type that can be converted to `Arc<str>`.
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Get the service name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the service name into the inner `Arc<str>`.
    #[must_use]
    pub fn into_inner(self) -> Arc<str> {
        self.0
    }
}

impl Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ServiceName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<Arc<str>> for ServiceName {
    fn from(s: Arc<str>) -> Self {
        Self(s)
    }
}

impl From<ServiceName> for Arc<str> {
    fn from(service: ServiceName) -> Self {
        service.0
    }
}

impl From<&ServiceName> for Arc<str> {
    fn from(service: &ServiceName) -> Self {
        service.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_creation() {
        let service = ServiceName::new("webhook-sink");
        assert_eq!(service.as_str(), "webhook-sink");
    }

    #[test]
    fn test_service_name_from_string() {
        let s = String::from("source-reader");
        let service: ServiceName = s.into();
        assert_eq!(service.as_str(), "source-reader");
    }

    #[test]
    fn test_service_name_display() {
        let service = ServiceName::new("display-service");
        assert_eq!(format!("{service}"), "display-service");
    }

    #[test]
    fn test_service_name_equality() {
        let a = ServiceName::new("svc");
        let b = ServiceName::new("svc");
        let c = ServiceName::new("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_service_name_hash_as_map_key() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        let service = ServiceName::new("hash-service");
        map.insert(service.clone(), 42);

        assert_eq!(map.get(&service), Some(&42));
    }

    #[test]
    fn test_service_name_serde() {
        let service = ServiceName::new("serde-service");
        let serialized = serde_json::to_string(&service).unwrap();
        assert_eq!(serialized, "\"serde-service\"");

        let deserialized: ServiceName = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, service);
    }
}
