//! Cache key derivation
//!
//! The cache key is the only identity the store, priming and invalidation
//! ever see, so a [`CacheKeyFn`] must be a pure function of key content:
//! two keys that are semantically equal must produce the same string.
//!
//! [`DisplayKey`] covers primitive keys. Structured keys need [`JsonKey`],
//! a [`CacheKeyBuilder`] inside a closure, or any other caller supplied
//! function. Deep equality is never inferred automatically.

use serde::Serialize;
use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use tracing::warn;

/// Storage key type
pub type CacheKey = String;

/// Derives a [`CacheKey`] from a loader key
pub trait CacheKeyFn<K>: Send + Sync {
    /// Normalize `key` into its cache key
    fn cache_key(&self, key: &K) -> CacheKey;
}

impl<K, F> CacheKeyFn<K> for F
where
    F: Fn(&K) -> CacheKey + Send + Sync,
{
    fn cache_key(&self, key: &K) -> CacheKey {
        self(key)
    }
}

/// Default normalization: `key.to_string()`
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayKey;

impl<K: Display> CacheKeyFn<K> for DisplayKey {
    fn cache_key(&self, key: &K) -> CacheKey {
        key.to_string()
    }
}

/// Normalization through `serde_json`
///
/// Deterministic as long as the key serializes deterministically: structs,
/// tuples, vectors and `BTreeMap` do, `HashMap` does not.
pub struct JsonKey<K> {
    _key: PhantomData<fn(&K)>,
}

impl<K> JsonKey<K> {
    pub fn new() -> Self {
        Self { _key: PhantomData }
    }
}

impl<K> Default for JsonKey<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for JsonKey<K> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K: Serialize + Debug> CacheKeyFn<K> for JsonKey<K> {
    fn cache_key(&self, key: &K) -> CacheKey {
        match serde_json::to_string(key) {
            Ok(json) => json,
            Err(e) => {
                // Only reachable for maps with non-string keys
                warn!("Key {:?} is not JSON serializable ({}), using debug form", key, e);
                format!("{:?}", key)
            }
        }
    }
}

/// Builder for composite cache keys of the form `kind:id?a=1&b=2`
///
/// Parameters are sorted by name on build, so insertion order does not
/// change the resulting key.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    kind: String,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder for a kind of record
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Display) -> Self {
        self.identifier = id.to_string();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Build the cache key
    pub fn build(mut self) -> CacheKey {
        let mut key = format!("{}:{}", self.kind, self.identifier);

        if !self.params.is_empty() {
            self.params.sort();
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params.join("&"));
        }

        key
    }
}

/// Prefix a cache key with a namespace (`ns::key`)
pub(crate) fn namespaced(namespace: &str, key: &str) -> CacheKey {
    format!("{}::{}", namespace, key)
}
