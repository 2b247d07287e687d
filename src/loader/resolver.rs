//! Cache-aware batch resolution
//!
//! [`CacheAwareResolver`] sits between the coalescer and the user's
//! [`BatchFn`]. For every batch it reads the store once, forwards only the
//! missing keys upstream, writes successful values back once, and merges the
//! two halves back into input order.

use crate::error::{Fault, LoaderError, Result};
use crate::key::{CacheKey, CacheKeyFn};
use crate::loader::stats::StatsCounters;
use crate::store::CacheStore;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a batch function call: one result per key, or a batch-wide fault
pub type BatchResult<V> = std::result::Result<Vec<std::result::Result<V, Fault>>, Fault>;

/// User-supplied batch resolution function
///
/// Must return exactly one result per key, in key order. Returning `Err`
/// fails every key of the call; an `Err` element fails only that key.
///
/// Closures of the form `|keys: Vec<K>| async move { ... }` implement this
/// trait directly.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    /// Resolve a batch of keys
    async fn load(&self, keys: &[K]) -> BatchResult<V>;
}

#[async_trait]
impl<K, V, F, Fut> BatchFn<K, V> for F
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchResult<V>> + Send,
{
    async fn load(&self, keys: &[K]) -> BatchResult<V> {
        self(keys.to_vec()).await
    }
}

/// What the coalescer needs from whatever resolves its batches
#[async_trait]
pub(crate) trait Resolve<K, V>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    /// Identity used for the primed-fault registry
    fn cache_key(&self, key: &K) -> CacheKey;

    /// One result per key in key order, or a failure for the whole batch
    async fn resolve(&self, keys: &[K]) -> Result<Vec<Result<V>>>;
}

pub(crate) struct CacheAwareResolver<K, V, F, S> {
    batch_fn: F,
    store: S,
    key_fn: Arc<dyn CacheKeyFn<K>>,
    ttl: Option<Duration>,
    stats: Arc<StatsCounters>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, F, S> CacheAwareResolver<K, V, F, S> {
    pub(crate) fn new(
        batch_fn: F,
        store: S,
        key_fn: Arc<dyn CacheKeyFn<K>>,
        ttl: Option<Duration>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        Self {
            batch_fn,
            store,
            key_fn,
            ttl,
            stats,
            _value: PhantomData,
        }
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

#[async_trait]
impl<K, V, F, S> Resolve<K, V> for CacheAwareResolver<K, V, F, S>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
    S: CacheStore<V> + 'static,
{
    fn cache_key(&self, key: &K) -> CacheKey {
        self.key_fn.cache_key(key)
    }

    async fn resolve(&self, keys: &[K]) -> Result<Vec<Result<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let cache_keys: Vec<CacheKey> = keys.iter().map(|key| self.key_fn.cache_key(key)).collect();

        let cached = self
            .store
            .get_many(&cache_keys)
            .await
            .map_err(LoaderError::CacheRead)?;
        if cached.len() != keys.len() {
            return Err(LoaderError::Invariant(format!(
                "cache returned {} entries for {} keys",
                cached.len(),
                keys.len()
            )));
        }

        let mut merged: Vec<Option<Result<V>>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<usize> = Vec::new();
        for (position, value) in cached.into_iter().enumerate() {
            if value.is_none() {
                missing.push(position);
            }
            merged.push(value.map(Ok));
        }

        StatsCounters::add(&self.stats.cache_hits, keys.len() - missing.len());
        StatsCounters::add(&self.stats.cache_misses, missing.len());

        if missing.is_empty() {
            debug!("All {} keys served from cache", keys.len());
        } else {
            debug!(
                "Cache partition: {} cached, {} going upstream",
                keys.len() - missing.len(),
                missing.len()
            );
            self.resolve_missing(keys, &cache_keys, &missing, &mut merged)
                .await;
        }

        merged
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    LoaderError::Invariant(format!(
                        "position {} left unfilled after merge",
                        position
                    ))
                })
            })
            .collect()
    }
}

impl<K, V, F, S> CacheAwareResolver<K, V, F, S>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
    S: CacheStore<V> + 'static,
{
    /// Fetch the missing positions upstream, write them back, fill `merged`
    async fn resolve_missing(
        &self,
        keys: &[K],
        cache_keys: &[CacheKey],
        missing: &[usize],
        merged: &mut [Option<Result<V>>],
    ) {
        let upstream_keys: Vec<K> = missing.iter().map(|&i| keys[i].clone()).collect();

        StatsCounters::add(&self.stats.upstream_calls, 1);
        StatsCounters::add(&self.stats.upstream_keys, upstream_keys.len());

        let results = match self.batch_fn.load(&upstream_keys).await {
            Ok(results) if results.len() == upstream_keys.len() => results,
            Ok(results) => {
                warn!(
                    "Batch function returned {} results for {} keys",
                    results.len(),
                    upstream_keys.len()
                );
                let error = LoaderError::LengthMismatch {
                    expected: upstream_keys.len(),
                    actual: results.len(),
                };
                fill(merged, missing, &error);
                return;
            }
            Err(fault) => {
                debug!("Batch function failed for {} keys: {}", upstream_keys.len(), fault);
                fill(merged, missing, &LoaderError::BatchFailed(fault));
                return;
            }
        };

        let mut writes: Vec<(CacheKey, V)> = Vec::new();
        let mut written: Vec<usize> = Vec::new();
        for (&position, result) in missing.iter().zip(results) {
            match result {
                Ok(value) => {
                    writes.push((cache_keys[position].clone(), value.clone()));
                    written.push(position);
                    merged[position] = Some(Ok(value));
                }
                Err(fault) => {
                    merged[position] = Some(Err(LoaderError::Fault(fault)));
                }
            }
        }

        if writes.is_empty() {
            return;
        }

        if let Err(e) = self.store.set_many(writes, self.ttl).await {
            warn!("Cache write-back failed for {} keys: {}", written.len(), e);
            StatsCounters::add(&self.stats.write_failures, 1);
            fill(merged, &written, &LoaderError::CacheWrite(e));
        }
    }
}

fn fill<V>(merged: &mut [Option<Result<V>>], positions: &[usize], error: &LoaderError) {
    for &position in positions {
        merged[position] = Some(Err(error.clone()));
    }
}
