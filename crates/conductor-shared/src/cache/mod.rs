//! # Cache Strategy
//!
//! Process-local read cache fronting a pluggable backend store. The
//! strategy is detected from the backend's capabilities:
//!
//! - atomic increments + distributed locking  -> `distributed_atomic`
//! - distributed reads/writes without atomics -> `distributed_basic`
//! - single-process backend                   -> `local_only`
//!
//! Cache failures never fail a request: errors degrade to a miss (reads)
//! or a no-op (writes) with a warning. The shipped backend is in-memory;
//! distributed stores plug in through `CacheBackend` from outside the core.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

use crate::config::CacheConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// What a backend can do; drives strategy detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCapabilities {
    /// Visible to other processes
    pub distributed: bool,
    /// Supports atomic increments
    pub atomic_increment: bool,
    /// Supports distributed locking
    pub locking: bool,
}

/// Coordination level the cache layer runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    DistributedAtomic,
    DistributedBasic,
    LocalOnly,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CacheStrategy::DistributedAtomic => "distributed_atomic",
            CacheStrategy::DistributedBasic => "distributed_basic",
            CacheStrategy::LocalOnly => "local_only",
        };
        write!(f, "{label}")
    }
}

impl CacheStrategy {
    pub fn detect(capabilities: &CacheCapabilities) -> Self {
        if capabilities.distributed && capabilities.atomic_increment && capabilities.locking {
            CacheStrategy::DistributedAtomic
        } else if capabilities.distributed {
            CacheStrategy::DistributedBasic
        } else {
            CacheStrategy::LocalOnly
        }
    }
}

/// Pluggable store behind the process-local front
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> CacheCapabilities;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;
}

/// In-memory backend; single-process, TTL-expiring
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> CacheCapabilities {
        CacheCapabilities {
            distributed: false,
            atomic_increment: true,
            locking: false,
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > Instant::now() {
                return Ok(Some(entry.0.clone()));
            }
        }
        // expired or absent; the guard above is released before this remove
        self.entries.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            (
                Value::from(0i64),
                Instant::now() + Duration::from_secs(3600),
            )
        });
        let current = entry.0.as_i64().unwrap_or(0);
        let next = current + delta;
        entry.0 = Value::from(next);
        Ok(next)
    }
}

/// Hit/miss tallies driving the adaptive TTL
#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheMetrics {
    fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total < 20 {
            // not enough samples to steer the TTL
            return None;
        }
        Some(hits as f64 / total as f64)
    }
}

/// Process-local cache with a pluggable backend and adaptive TTL.
///
/// Reads go through a short-lived in-process front (bounded staleness even
/// for distributed backends), then the backend.
pub struct CacheService {
    front: moka::sync::Cache<String, Value>,
    backend: Box<dyn CacheBackend>,
    strategy: CacheStrategy,
    config: CacheConfig,
    metrics: CacheMetrics,
    current_ttl: RwLock<Duration>,
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.name())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl CacheService {
    pub fn new(backend: Box<dyn CacheBackend>, config: CacheConfig) -> Self {
        let strategy = CacheStrategy::detect(&backend.capabilities());
        let current_ttl = RwLock::new(Duration::from_secs(config.default_ttl_seconds));
        let front = moka::sync::Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.min_ttl_seconds))
            .build();
        Self {
            front,
            backend,
            strategy,
            config,
            metrics: CacheMetrics::default(),
            current_ttl,
        }
    }

    /// Memory-backed service (`local_only` strategy)
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Box::new(MemoryBackend::new()), config)
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// TTL currently applied to writes, steered by observed hit rate within
    /// the configured bounds.
    pub fn effective_ttl(&self) -> Duration {
        *self
            .current_ttl
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn adapt_ttl(&self) {
        let Some(rate) = self.metrics.hit_rate() else {
            return;
        };
        let target = if rate >= self.config.high_hit_rate_threshold {
            Duration::from_secs(self.config.max_ttl_seconds)
        } else if rate <= self.config.low_hit_rate_threshold {
            Duration::from_secs(self.config.min_ttl_seconds)
        } else {
            Duration::from_secs(self.config.default_ttl_seconds)
        };
        if let Ok(mut ttl) = self.current_ttl.write() {
            *ttl = target;
        }
    }

    /// Read a value; backend errors degrade to a miss
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.front.get(key) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            self.adapt_ttl();
            return Some(value);
        }

        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                self.adapt_ttl();
                self.front.insert(key.to_string(), value.clone());
                Some(value)
            }
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                self.adapt_ttl();
                None
            }
            Err(error) => {
                warn!(key = key, error = %error, "Cache get failed; treating as miss");
                None
            }
        }
    }

    /// Write a value with an explicit TTL; errors degrade to a no-op
    pub async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.effective_ttl());
        let clamped = ttl
            .max(Duration::from_secs(self.config.min_ttl_seconds))
            .min(Duration::from_secs(self.config.max_ttl_seconds));
        self.front.insert(key.to_string(), value.clone());
        if let Err(error) = self.backend.put(key, value, clamped).await {
            warn!(key = key, error = %error, "Cache put failed; skipping");
        }
    }

    /// Increment a counter; errors degrade to returning None
    pub async fn increment(&self, key: &str, delta: i64) -> Option<i64> {
        self.front.invalidate(key);
        match self.backend.increment(key, delta).await {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key = key, error = %error, "Cache increment failed; skipping");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_detection() {
        let atomic = CacheCapabilities {
            distributed: true,
            atomic_increment: true,
            locking: true,
        };
        assert_eq!(
            CacheStrategy::detect(&atomic),
            CacheStrategy::DistributedAtomic
        );

        let basic = CacheCapabilities {
            distributed: true,
            atomic_increment: false,
            locking: false,
        };
        assert_eq!(
            CacheStrategy::detect(&basic),
            CacheStrategy::DistributedBasic
        );

        let local = CacheCapabilities {
            distributed: false,
            atomic_increment: true,
            locking: false,
        };
        assert_eq!(CacheStrategy::detect(&local), CacheStrategy::LocalOnly);
    }

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let service = CacheService::in_memory(CacheConfig::default());
        assert_eq!(service.strategy(), CacheStrategy::LocalOnly);

        service
            .put("health", json!({"steps": 5}), Some(Duration::from_secs(30)))
            .await;
        let value = service.get("health").await.expect("cached value");
        assert_eq!(value["steps"], 5);
    }

    #[tokio::test]
    async fn test_memory_backend_expires() {
        let backend = MemoryBackend::new();
        backend
            .put("ephemeral", json!(1), Duration::from_millis(0))
            .await
            .unwrap();
        // zero TTL entries are expired on next read
        assert_eq!(backend.get("ephemeral").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_accumulates() {
        let service = CacheService::in_memory(CacheConfig::default());
        assert_eq!(service.increment("counter", 2).await, Some(2));
        assert_eq!(service.increment("counter", 3).await, Some(5));
    }

    #[tokio::test]
    async fn test_failing_backend_degrades_without_error() {
        struct BrokenBackend;

        #[async_trait]
        impl CacheBackend for BrokenBackend {
            fn name(&self) -> &str {
                "broken"
            }

            fn capabilities(&self) -> CacheCapabilities {
                CacheCapabilities {
                    distributed: true,
                    atomic_increment: true,
                    locking: true,
                }
            }

            async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
                Err(CacheError::Backend("connection refused".to_string()))
            }

            async fn put(
                &self,
                _key: &str,
                _value: Value,
                _ttl: Duration,
            ) -> Result<(), CacheError> {
                Err(CacheError::Backend("connection refused".to_string()))
            }

            async fn increment(&self, _key: &str, _delta: i64) -> Result<i64, CacheError> {
                Err(CacheError::Backend("connection refused".to_string()))
            }
        }

        let service = CacheService::new(Box::new(BrokenBackend), CacheConfig::default());
        assert_eq!(service.strategy(), CacheStrategy::DistributedAtomic);
        assert_eq!(service.get("anything").await, None);
        service.put("anything", json!(1), None).await;
        assert_eq!(service.increment("anything", 1).await, None);
    }

    #[tokio::test]
    async fn test_adaptive_ttl_stretches_on_high_hit_rate() {
        let config = CacheConfig::default();
        let service = CacheService::in_memory(config.clone());
        service.put("hot", json!(1), None).await;

        for _ in 0..30 {
            let _ = service.get("hot").await;
        }

        assert_eq!(
            service.effective_ttl(),
            Duration::from_secs(config.max_ttl_seconds)
        );
    }

    #[tokio::test]
    async fn test_adaptive_ttl_shrinks_on_low_hit_rate() {
        let config = CacheConfig::default();
        let service = CacheService::in_memory(config.clone());

        for i in 0..30 {
            let _ = service.get(&format!("cold_{i}")).await;
        }

        assert_eq!(
            service.effective_ttl(),
            Duration::from_secs(config.min_ttl_seconds)
        );
    }
}
