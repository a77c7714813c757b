//! Cache configuration

use serde::{Deserialize, Serialize};

/// Process-local cache tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Default TTL for entries without an explicit one
    #[serde(default = "CacheConfig::default_ttl_seconds")]
    pub default_ttl_seconds: u64,
    /// Adaptive TTL floor
    #[serde(default = "CacheConfig::default_min_ttl_seconds")]
    pub min_ttl_seconds: u64,
    /// Adaptive TTL ceiling
    #[serde(default = "CacheConfig::default_max_ttl_seconds")]
    pub max_ttl_seconds: u64,
    /// Hit rate above which the TTL is stretched toward the ceiling
    #[serde(default = "CacheConfig::default_high_hit_rate_threshold")]
    pub high_hit_rate_threshold: f64,
    /// Hit rate below which the TTL is shrunk toward the floor
    #[serde(default = "CacheConfig::default_low_hit_rate_threshold")]
    pub low_hit_rate_threshold: f64,
    /// Front-cache entry capacity
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: u64,
}

impl CacheConfig {
    fn default_ttl_seconds() -> u64 {
        30
    }

    fn default_min_ttl_seconds() -> u64 {
        5
    }

    fn default_max_ttl_seconds() -> u64 {
        300
    }

    fn default_high_hit_rate_threshold() -> f64 {
        0.8
    }

    fn default_low_hit_rate_threshold() -> f64 {
        0.2
    }

    fn default_max_entries() -> u64 {
        10_000
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: Self::default_ttl_seconds(),
            min_ttl_seconds: Self::default_min_ttl_seconds(),
            max_ttl_seconds: Self::default_max_ttl_seconds(),
            high_hit_rate_threshold: Self::default_high_hit_rate_threshold(),
            low_hit_rate_threshold: Self::default_low_hit_rate_threshold(),
            max_entries: Self::default_max_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl_seconds, 30);
        assert_eq!(config.min_ttl_seconds, 5);
        assert_eq!(config.max_ttl_seconds, 300);
        assert!(config.min_ttl_seconds <= config.max_ttl_seconds);
    }
}
