//! # Cached batch loader
//!
//! [`CachedLoader`] turns a batch function into a per-key `load` API. Loads
//! issued in the same scheduling tick are coalesced into one batch, cached
//! keys are answered from the [`CacheStore`], and only the rest reach the
//! batch function.
//!
//! Every mutating operation (`prime`, `clear`, `clear_many`, `clear_all`)
//! completes only after the store confirmed the change and returns the
//! loader, so chains like `loader.clear(&k).await?.prime(&k, Ok(v)).await?`
//! run strictly in order.
//!
//! ## Known race
//!
//! A `prime` that lands between a batch's cache read and its write-back can
//! be overwritten by the upstream value. Stores are not assumed to support
//! multi-key transactions, so this window is accepted rather than closed.

pub mod config;
mod coalescer;
mod resolver;
pub mod stats;

pub use config::{BatchOptions, LoaderConfig};
pub use resolver::{BatchFn, BatchResult};
pub use stats::LoaderStats;

use crate::error::{Fault, Result};
use crate::key::{CacheKey, CacheKeyFn, DisplayKey};
use crate::store::{CacheStore, MemoryStore, StoreConfig};
use coalescer::Coalescer;
use resolver::{CacheAwareResolver, Resolve};
use stats::StatsCounters;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Batching loader with a TTL cache in front of the batch function
///
/// Cloning is cheap; clones share the coalescer, the store and statistics.
pub struct CachedLoader<K, V, F, S = MemoryStore<V>> {
    id: Uuid,
    coalescer: Coalescer<K, V, CacheAwareResolver<K, V, F, S>>,
    stats: Arc<StatsCounters>,
}

impl<K, V, F, S> Clone for CachedLoader<K, V, F, S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            coalescer: self.coalescer.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<K, V, F> CachedLoader<K, V, F, MemoryStore<V>>
where
    K: Display + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    /// Loader with default configuration: `to_string()` cache keys, an
    /// in-memory store and no TTL
    pub fn new(batch_fn: F) -> Self {
        let config = LoaderConfig::default();
        let store = MemoryStore::new(config.store.clone());
        Self::assemble(batch_fn, store, Arc::new(DisplayKey), config)
    }

    /// Loader with `to_string()` cache keys and an in-memory store built from `config`
    pub fn with_config(batch_fn: F, config: LoaderConfig) -> Result<Self> {
        LoaderBuilder::new(batch_fn).config(config).build()
    }

    /// Start a builder with `to_string()` cache keys and an in-memory store
    pub fn builder(batch_fn: F) -> LoaderBuilder<K, V, F, MemoryStore<V>> {
        LoaderBuilder::new(batch_fn)
    }
}

impl<K, V, F, S> CachedLoader<K, V, F, S>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
    S: CacheStore<V> + 'static,
{
    fn assemble(
        batch_fn: F,
        store: S,
        key_fn: Arc<dyn CacheKeyFn<K>>,
        config: LoaderConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let stats = Arc::new(StatsCounters::default());
        let resolver =
            CacheAwareResolver::new(batch_fn, store, key_fn, config.ttl, Arc::clone(&stats));

        info!(
            "Created cached loader {} (ttl: {:?}, batch: {:?})",
            id, config.ttl, config.batch
        );

        Self {
            id,
            coalescer: Coalescer::new(resolver, config.batch, Arc::clone(&stats)),
            stats,
        }
    }

    /// Load one key
    ///
    /// Joins the batch of the current tick. Must be called within a tokio
    /// runtime.
    pub async fn load(&self, key: &K) -> Result<V> {
        self.coalescer.load(key.clone()).await
    }

    /// Load many keys; never fails as a whole
    ///
    /// Position `i` of the result belongs to `keys[i]`.
    pub async fn load_many(&self, keys: &[K]) -> Vec<Result<V>> {
        if keys.is_empty() {
            return Vec::new();
        }

        self.coalescer.load_many(keys.to_vec()).await
    }

    /// Seed a result for `key` without calling the batch function
    ///
    /// A value is written to the store with the loader TTL unless one is
    /// already cached, in which case nothing changes. From then on it lives
    /// and dies like any cached value. A fault removes any cached value and
    /// answers the next `load` of `key` only; it is never stored.
    pub async fn prime(&self, key: &K, result: std::result::Result<V, Fault>) -> Result<&Self> {
        let cache_key = self.cache_key(key);
        let store = self.resolver().store();

        match result {
            Ok(value) => {
                if store.get(&cache_key).await?.is_some() {
                    debug!("Loader {}: {} already cached, prime ignored", self.id, cache_key);
                    return Ok(self);
                }
                store.set(cache_key, value, self.resolver().ttl()).await?;
            }
            Err(fault) => {
                store.delete(&cache_key).await?;
                self.coalescer.prime_fault(cache_key, fault);
            }
        }

        Ok(self)
    }

    /// Shorthand for `prime(key, Ok(value))`
    pub async fn prime_value(&self, key: &K, value: V) -> Result<&Self> {
        self.prime(key, Ok(value)).await
    }

    /// Forget `key`: drops any primed fault and deletes its cache record
    pub async fn clear(&self, key: &K) -> Result<&Self> {
        let cache_key = self.cache_key(key);
        self.coalescer.clear(&cache_key);
        self.resolver().store().delete(&cache_key).await?;
        Ok(self)
    }

    /// Batched [`clear`](Self::clear) using a single store delete
    pub async fn clear_many(&self, keys: &[K]) -> Result<&Self> {
        if keys.is_empty() {
            return Ok(self);
        }

        let cache_keys: Vec<CacheKey> = keys.iter().map(|key| self.cache_key(key)).collect();
        for cache_key in &cache_keys {
            self.coalescer.clear(cache_key);
        }
        self.resolver().store().delete_many(&cache_keys).await?;
        Ok(self)
    }

    /// Forget everything: primed faults and every record the store owns
    pub async fn clear_all(&self) -> Result<&Self> {
        self.coalescer.clear_all();
        self.resolver().store().clear().await?;
        info!("Loader {}: cleared all cached entries", self.id);
        Ok(self)
    }

    /// The cache key `key` is stored under
    pub fn cache_key(&self, key: &K) -> CacheKey {
        self.resolver().cache_key(key)
    }

    /// The backing store
    pub fn store(&self) -> &S {
        self.resolver().store()
    }

    /// Instance id used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Snapshot of loader statistics
    pub fn stats(&self) -> LoaderStats {
        self.stats.snapshot()
    }

    fn resolver(&self) -> &CacheAwareResolver<K, V, F, S> {
        self.coalescer.resolver()
    }
}

/// Builder for [`CachedLoader`]
pub struct LoaderBuilder<K, V, F, S = MemoryStore<V>> {
    batch_fn: F,
    store: S,
    key_fn: Arc<dyn CacheKeyFn<K>>,
    config: LoaderConfig,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, F> LoaderBuilder<K, V, F, MemoryStore<V>>
where
    K: Display + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    /// Builder with `to_string()` cache keys and an in-memory store
    pub fn new(batch_fn: F) -> Self {
        Self::with_key_fn(batch_fn, DisplayKey)
    }
}

impl<K, V, F> LoaderBuilder<K, V, F, MemoryStore<V>>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    /// Builder for keys without a `Display` form
    pub fn with_key_fn(batch_fn: F, key_fn: impl CacheKeyFn<K> + 'static) -> Self {
        let config = LoaderConfig::default();

        Self {
            batch_fn,
            store: MemoryStore::new(config.store.clone()),
            key_fn: Arc::new(key_fn),
            config,
            _value: PhantomData,
        }
    }

    /// Rebuild the in-memory store from `config`
    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store = MemoryStore::new(config.clone());
        self.config.store = config;
        self
    }

    /// Apply a full configuration, including the store section
    pub fn config(self, config: LoaderConfig) -> Self {
        let store_config = config.store.clone();
        let mut builder = self.store_config(store_config);
        builder.config = config;
        builder
    }
}

impl<K, V, F, S> LoaderBuilder<K, V, F, S>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
    S: CacheStore<V> + 'static,
{
    /// Use a custom cache key function
    pub fn cache_key_fn(mut self, key_fn: impl CacheKeyFn<K> + 'static) -> Self {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// TTL written with every cached value
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Upper bound on keys per batch function call
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.batch.max_batch_size = Some(size);
        self
    }

    /// How long a batch collects requests before dispatch
    pub fn batch_delay(mut self, delay: Duration) -> Self {
        self.config.batch.delay = delay;
        self
    }

    /// Use an existing store instead of the in-memory default
    pub fn store<S2: CacheStore<V> + 'static>(self, store: S2) -> LoaderBuilder<K, V, F, S2> {
        LoaderBuilder {
            batch_fn: self.batch_fn,
            store,
            key_fn: self.key_fn,
            config: self.config,
            _value: PhantomData,
        }
    }

    /// Validate the configuration and build the loader
    pub fn build(self) -> Result<CachedLoader<K, V, F, S>> {
        self.config.validate()?;
        Ok(CachedLoader::assemble(
            self.batch_fn,
            self.store,
            self.key_fn,
            self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoaderError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Calls = Arc<AtomicUsize>;

    fn squares(calls: Calls) -> impl BatchFn<u64, u64> {
        move |keys: Vec<u64>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let result: BatchResult<u64> = Ok(keys.into_iter().map(|k| Ok(k * k)).collect());
                result
            }
        }
    }

    #[tokio::test]
    async fn test_load_caches_values() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));

        assert_eq!(loader.load(&3).await.unwrap(), 9);
        assert_eq!(loader.load(&3).await.unwrap(), 9);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.store().get("3").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_load_many_empty() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));

        assert!(loader.load_many(&[]).await.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(loader.stats().batches, 0);
    }

    #[tokio::test]
    async fn test_prime_chain_is_ordered() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));

        loader.prime_value(&2, 40).await.unwrap();
        loader
            .clear(&2)
            .await
            .unwrap()
            .prime_value(&2, 41)
            .await
            .unwrap();

        assert_eq!(loader.load(&2).await.unwrap(), 41);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_primed_value_lives_in_the_store() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));

        loader.prime_value(&6, 1).await.unwrap();
        loader.store().delete("6").await.unwrap();

        assert_eq!(loader.load(&6).await.unwrap(), 36);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.stats().primed_hits, 0);
    }

    #[tokio::test]
    async fn test_clear_many() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));

        loader.load_many(&[1, 2, 3]).await;
        loader.clear_many(&[1, 2]).await.unwrap();
        loader.clear_many(&[1, 2]).await.unwrap();

        assert!(loader.store().get("1").await.unwrap().is_none());
        assert_eq!(loader.store().get("3").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_builder_validates() {
        let result = CachedLoader::<u64, u64, _>::builder(squares(Calls::default()))
            .max_batch_size(0)
            .build();

        assert!(matches!(result, Err(LoaderError::Config(_))));
    }

    #[tokio::test]
    async fn test_custom_key_fn() {
        let calls = Calls::default();
        let loader = CachedLoader::<u64, u64, _>::builder(squares(calls.clone()))
            .cache_key_fn(|k: &u64| format!("sq:{}", k))
            .build()
            .unwrap();

        loader.load(&4).await.unwrap();

        assert_eq!(loader.cache_key(&4), "sq:4");
        assert_eq!(loader.store().get("sq:4").await.unwrap(), Some(16));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let calls = Calls::default();
        let loader: CachedLoader<u64, u64, _> = CachedLoader::new(squares(calls.clone()));
        let other = loader.clone();

        loader.load(&5).await.unwrap();
        other.load(&5).await.unwrap();

        assert_eq!(loader.id(), other.id());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.stats().cache_hits, 1);
    }
}
