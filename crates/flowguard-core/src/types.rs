//! Plain data passed across the cache and breaker APIs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Options for a single cache insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutOptions {
    /// Per-entry TTL. `None` uses the cache's default TTL; zero disables
    /// the expiry timer (the entry is still swept and evictable).
    #[serde(with = "crate::config::duration_opt")]
    pub ttl: Option<Duration>,

    /// Store in the durable tier instead of the ephemeral one.
    pub strong: bool,
}

impl PutOptions {
    /// Durable entry with the cache's default TTL.
    pub fn strong() -> Self {
        Self {
            ttl: None,
            strong: true,
        }
    }

    /// Ephemeral entry.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Override the TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Diagnostic context for a guarded call.
///
/// Carries no behavioral weight: the operation name only shows up in
/// `CircuitOpenError` messages and log fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Name of the guarded operation (e.g., "load_feed")
    #[serde(default)]
    pub operation: Option<String>,

    /// Free-form attributes for logging
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CallContext {
    /// Create a context naming the guarded operation.
    pub fn named(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a diagnostic attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Operation name used in messages, falling back to "operation".
    pub fn operation_name(&self) -> &str {
        self.operation.as_deref().unwrap_or("operation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_options_defaults() {
        let opts = PutOptions::default();
        assert!(!opts.strong);
        assert_eq!(opts.ttl, None);

        let opts = PutOptions::strong().with_ttl(Duration::from_secs(5));
        assert!(opts.strong);
        assert_eq!(opts.ttl, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_operation_name_fallback() {
        assert_eq!(CallContext::default().operation_name(), "operation");
        assert_eq!(CallContext::named("load_feed").operation_name(), "load_feed");
    }

    #[test]
    fn test_put_options_from_yaml() {
        let opts: PutOptions = serde_yaml::from_str("strong: true\nttl: 2m").unwrap();
        assert!(opts.strong);
        assert_eq!(opts.ttl, Some(Duration::from_secs(120)));

        let opts: PutOptions = serde_yaml::from_str("ttl: 0").unwrap();
        assert_eq!(opts.ttl, Some(Duration::ZERO));
    }
}
