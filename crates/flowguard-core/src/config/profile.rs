//! Named cache profiles.
//!
//! Media caches are the generic cache with different settings, not
//! separate types. A profile bundles the settings, the key namespace and
//! the put options the feed uses for that kind of payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::CacheConfig;
use crate::types::PutOptions;

/// Kind of payload a cache instance holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheProfile {
    #[default]
    General,
    Video,
    Image,
}

impl CacheProfile {
    /// Preset configuration for this profile.
    pub fn config(self) -> CacheConfig {
        match self {
            CacheProfile::General => CacheConfig::default(),
            CacheProfile::Video => CacheConfig::video(),
            CacheProfile::Image => CacheConfig::image(),
        }
    }

    /// Namespaced cache key for an item id.
    pub fn key_for(self, id: impl fmt::Display) -> String {
        match self {
            CacheProfile::General => id.to_string(),
            CacheProfile::Video => format!("video_{}", id),
            CacheProfile::Image => format!("image_{}", id),
        }
    }

    /// Put options used when storing a fetched item.
    ///
    /// Videos are pinned in the durable tier for two minutes; images go
    /// durable with the cache default; general items are ephemeral.
    pub fn put_options(self) -> PutOptions {
        match self {
            CacheProfile::General => PutOptions::ephemeral(),
            CacheProfile::Video => PutOptions::strong().with_ttl(Duration::from_secs(120)),
            CacheProfile::Image => PutOptions::strong(),
        }
    }
}

impl fmt::Display for CacheProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheProfile::General => write!(f, "general"),
            CacheProfile::Video => write!(f, "video"),
            CacheProfile::Image => write!(f, "image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_profile() {
        let profile = CacheProfile::Video;
        assert_eq!(profile.key_for(42), "video_42");
        assert_eq!(profile.config().max_size, 50);

        let opts = profile.put_options();
        assert!(opts.strong);
        assert_eq!(opts.ttl, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_general_profile_is_unprefixed() {
        assert_eq!(CacheProfile::General.key_for("abc"), "abc");
        assert!(!CacheProfile::General.put_options().strong);
    }
}
