//! Loader configuration

use crate::error::{LoaderError, Result};
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Environment variable holding the cache TTL in milliseconds
pub const ENV_TTL_MS: &str = "CACHED_LOADER_TTL_MS";
/// Environment variable holding the maximum number of keys per batch
pub const ENV_MAX_BATCH_SIZE: &str = "CACHED_LOADER_MAX_BATCH_SIZE";
/// Environment variable holding the batch collection delay in milliseconds
pub const ENV_BATCH_DELAY_MS: &str = "CACHED_LOADER_BATCH_DELAY_MS";
/// Environment variable holding the store namespace
pub const ENV_NAMESPACE: &str = "CACHED_LOADER_NAMESPACE";

/// Options for the batch coalescer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Upper bound on keys per batch function call; larger batches are split
    pub max_batch_size: Option<usize>,

    /// How long a batch collects requests before dispatch.
    /// Zero dispatches after a single scheduler yield.
    pub delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: None,
            delay: Duration::ZERO,
        }
    }
}

/// Construction-time configuration for a [`CachedLoader`](crate::CachedLoader)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// TTL written with every cached value; `None` defers to the store policy
    pub ttl: Option<Duration>,

    /// Coalescer options
    pub batch: BatchOptions,

    /// Configuration for the bundled [`MemoryStore`](crate::store::MemoryStore)
    pub store: StoreConfig,
}

impl LoaderConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(LoaderError::Config("ttl must be greater than 0".to_string()));
        }

        if self.batch.max_batch_size == Some(0) {
            return Err(LoaderError::Config(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }

        self.store.validate()
    }

    /// Load configuration from the environment, reading `.env` if present
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_TTL_MS)? {
            config.ttl = Some(Duration::from_millis(ms));
        }

        if let Some(size) = parse_var::<usize>(&lookup, ENV_MAX_BATCH_SIZE)? {
            config.batch.max_batch_size = Some(size);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_BATCH_DELAY_MS)? {
            config.batch.delay = Duration::from_millis(ms);
        }

        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.store.namespace = Some(namespace);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoaderError::Config(format!("{} has invalid value {:?}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.ttl, None);
        assert_eq!(config.batch.max_batch_size, None);
        assert_eq!(config.batch.delay, Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = LoaderConfig {
            ttl: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.batch.max_batch_size = Some(0);
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.store.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = LoaderConfig::from_lookup(lookup(&[
            (ENV_TTL_MS, "1500"),
            (ENV_MAX_BATCH_SIZE, "64"),
            (ENV_BATCH_DELAY_MS, "5"),
            (ENV_NAMESPACE, "users"),
        ]))
        .unwrap();

        assert_eq!(config.ttl, Some(Duration::from_millis(1500)));
        assert_eq!(config.batch.max_batch_size, Some(64));
        assert_eq!(config.batch.delay, Duration::from_millis(5));
        assert_eq!(config.store.namespace.as_deref(), Some("users"));
    }

    #[test]
    fn test_from_lookup_empty() {
        let config = LoaderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ttl, None);
        assert_eq!(config.store.namespace, None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = LoaderConfig::from_lookup(lookup(&[(ENV_TTL_MS, "soon")])).unwrap_err();
        assert!(matches!(err, LoaderError::Config(msg) if msg.contains(ENV_TTL_MS)));

        let err = LoaderConfig::from_lookup(lookup(&[(ENV_MAX_BATCH_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }
}
