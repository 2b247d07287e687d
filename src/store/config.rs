//! Configuration for the in-memory cache store

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`MemoryStore`](crate::store::MemoryStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store-level TTL applied when a write carries no TTL of its own.
    /// `None` keeps such records until they are cleared or evicted.
    pub default_ttl: Option<Duration>,

    /// Maximum number of entries in the store
    pub max_entries: usize,

    /// Jitter factor (0.0 - 1.0) applied to `default_ttl` only; explicit
    /// per-write TTLs are kept exact
    pub ttl_jitter: f64,

    /// Enable automatic cleanup of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup checks
    pub cleanup_interval: Duration,

    /// Evict least recently used entries first when full; otherwise oldest write first
    pub enable_lru_eviction: bool,

    /// Count hits, misses, writes and removals in `CacheStats`
    pub enable_metrics: bool,

    /// Key prefix owned by this store view
    pub namespace: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            max_entries: 10_000,
            ttl_jitter: 0.0,
            enable_auto_cleanup: false,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            enable_lru_eviction: true,
            enable_metrics: true,
            namespace: None,
        }
    }
}

impl StoreConfig {
    /// Create a new builder for store configuration
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(LoaderError::Config(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(LoaderError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(LoaderError::Config(
                "cleanup_interval must be non-zero when auto cleanup is enabled".to_string(),
            ));
        }

        if matches!(&self.namespace, Some(ns) if ns.is_empty()) {
            return Err(LoaderError::Config("namespace must not be empty".to_string()));
        }

        Ok(())
    }

    /// Apply the configured jitter to a TTL
    pub fn ttl_with_jitter(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for store configuration
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_lru_eviction: Option<bool>,
    enable_metrics: Option<bool>,
    namespace: Option<String>,
}

impl StoreConfigBuilder {
    /// Set the store-level TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable LRU eviction
    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Scope the store to a namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build the store configuration
    pub fn build(self) -> StoreConfig {
        let defaults = StoreConfig::default();

        StoreConfig {
            default_ttl: self.default_ttl.or(defaults.default_ttl),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
            namespace: self.namespace.or(defaults.namespace),
        }
    }
}

/// Preset configurations for common use cases
impl StoreConfig {
    /// Rapidly changing data: 5 minute store TTL, frequent cleanup
    pub fn realtime() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(300)),
            max_entries: 5_000,
            ttl_jitter: 0.15,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Memory-constrained environments
    pub fn small() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(1800)),
            max_entries: 1_000,
            ttl_jitter: 0.10,
            ..Default::default()
        }
    }

    /// Large-scale deployments
    pub fn large() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(7200)),
            max_entries: 1_000_000,
            ttl_jitter: 0.10,
            enable_auto_cleanup: true,
            ..Default::default()
        }
    }
}
