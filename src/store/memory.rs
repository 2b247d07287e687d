//! In-memory cache store with TTL expiry and LRU eviction

use crate::error::{StoreError, StoreResult};
use crate::key::{namespaced, CacheKey};
use crate::store::types::{CacheStats, StoreEvent};
use crate::store::{config::StoreConfig, entry::CacheEntry, CacheStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared in-memory store
///
/// Cloning is cheap and yields a handle to the same map. A view created with
/// [`MemoryStore::namespaced`] shares the map too but prefixes every key, so
/// its [`clear`](CacheStore::clear) only touches that namespace.
pub struct MemoryStore<V> {
    config: Arc<StoreConfig>,
    namespace: Option<String>,
    state: Arc<RwLock<StoreState<V>>>,
}

struct StoreState<V> {
    /// Main storage: storage key -> entry
    entries: HashMap<CacheKey, CacheEntry<V>>,

    /// Eviction order
    recency: Recency,

    stats: CacheStats,

    /// Counters other than `entries` are only kept when set
    metrics: bool,
}

impl<V> Clone for MemoryStore<V> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            namespace: self.namespace.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl<V> MemoryStore<V> {
    /// Create a new store with the given configuration
    pub fn new(config: StoreConfig) -> Self {
        info!("Initializing memory cache store with config: {:?}", config);

        let namespace = config.namespace.clone();
        let state = StoreState {
            entries: HashMap::new(),
            recency: Recency::default(),
            stats: CacheStats::default(),
            metrics: config.enable_metrics,
        };

        Self {
            config: Arc::new(config),
            namespace,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// A view of the same map scoped to `namespace` (nested under the current one)
    pub fn namespaced(&self, namespace: &str) -> Self {
        let namespace = match &self.namespace {
            Some(outer) => namespaced(outer, namespace),
            None => namespace.to_string(),
        };

        Self {
            config: Arc::clone(&self.config),
            namespace: Some(namespace),
            state: Arc::clone(&self.state),
        }
    }

    /// The namespace this view owns, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Statistics for the whole backing map
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        state.stats.clone()
    }

    /// Number of records owned by this view, expired ones included until cleanup
    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        match self.prefix() {
            Some(prefix) => state.entries.keys().filter(|k| k.starts_with(&prefix)).count(),
            None => state.entries.len(),
        }
    }

    /// Check if this view owns no records
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check for a live record without touching access metadata
    pub async fn contains_key(&self, key: &str) -> bool {
        let storage_key = self.storage_key(key);
        let state = self.state.read().await;
        state
            .entries
            .get(&storage_key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove every expired record in the backing map
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let expired_keys: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            state.remove_entry(key);
        }
        state.record(StoreEvent::Expired(expired_keys.len() as u64));

        if !expired_keys.is_empty() {
            debug!("Cleaned up {} expired entries", expired_keys.len());
        }

        Ok(expired_keys.len())
    }

    fn storage_key(&self, key: &str) -> CacheKey {
        match &self.namespace {
            Some(ns) => namespaced(ns, key),
            None => key.to_string(),
        }
    }

    fn prefix(&self) -> Option<String> {
        self.namespace.as_ref().map(|ns| namespaced(ns, ""))
    }

    /// An explicit TTL is kept as is; jitter only spreads the store default
    fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        match ttl {
            Some(ttl) => Some(ttl),
            None => self
                .config
                .default_ttl
                .map(|ttl| self.config.ttl_with_jitter(ttl)),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> MemoryStore<V> {
    /// Spawn the cleanup task if the configuration asks for one
    pub fn spawn_auto_cleanup(&self) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_cleanup {
            return None;
        }
        Some(tokio::spawn(start_auto_cleanup(self.clone())))
    }
}

/// Write and access order of storage keys
///
/// Each touch stamps the key with a fresh tick, so the smallest tick is the
/// least recently used key. Touch, forget and pop are `O(log n)`.
#[derive(Debug, Default)]
struct Recency {
    ticks: HashMap<CacheKey, u64>,
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
}

impl Recency {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;

        if let Some(old) = self.ticks.insert(key.to_string(), tick) {
            self.order.remove(&old);
        }
        self.order.insert(tick, key.to_string());
    }

    fn forget(&mut self, key: &str) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }
}

impl<V: Clone> StoreState<V> {
    fn read_entry(&mut self, key: &str, now: DateTime<Utc>, touch_lru: bool) -> Option<V> {
        let Some(entry) = self.entries.get_mut(key) else {
            debug!("Cache miss: {}", key);
            self.record(StoreEvent::Miss);
            return None;
        };

        if entry.is_expired_at(now) {
            debug!("Cache entry expired: {}", key);
            self.record(StoreEvent::Miss);
            self.record(StoreEvent::Expired(1));
            self.remove_entry(key);
            return None;
        }

        entry.mark_accessed();
        let value = entry.value.clone();
        self.record(StoreEvent::Hit);

        if touch_lru {
            self.recency.touch(key);
        }

        debug!("Cache hit: {}", key);
        Some(value)
    }
}

impl<V> StoreState<V> {
    fn record(&mut self, event: StoreEvent) {
        if self.metrics {
            self.stats.record(event);
        }
    }

    fn sync_entries(&mut self) {
        self.stats.entries = self.entries.len();
    }

    fn insert_entry(
        &mut self,
        key: CacheKey,
        value: V,
        ttl: Option<Duration>,
        max_entries: usize,
    ) -> StoreResult<()> {
        if let Some(existing) = self.entries.get_mut(&key) {
            debug!("Updating existing cache entry: {}", key);
            existing.update_value(value, ttl);
            self.recency.touch(&key);
            self.record(StoreEvent::Write);
            return Ok(());
        }

        self.evict_if_needed(max_entries)?;

        debug!("Inserting new cache entry: {}", key);
        self.entries
            .insert(key.clone(), CacheEntry::new(key.clone(), value, ttl));
        self.recency.touch(&key);
        self.sync_entries();
        self.record(StoreEvent::Write);
        Ok(())
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.recency.forget(key);
            self.sync_entries();
            true
        } else {
            false
        }
    }

    fn evict_if_needed(&mut self, max_entries: usize) -> StoreResult<()> {
        while self.entries.len() >= max_entries {
            let Some(key) = self.recency.pop_oldest() else {
                warn!("Cannot evict more entries, cache entry limit exceeded");
                return Err(StoreError::CapacityExceeded { max_entries });
            };
            debug!("Evicting entry due to max_entries limit: {}", key);
            self.entries.remove(&key);
            self.record(StoreEvent::Evicted);
        }
        self.sync_entries();
        Ok(())
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        let storage_key = self.storage_key(key);
        let mut state = self.state.write().await;
        Ok(state.read_entry(&storage_key, Utc::now(), self.config.enable_lru_eviction))
    }

    async fn get_many(&self, keys: &[CacheKey]) -> StoreResult<Vec<Option<V>>> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let values = keys
            .iter()
            .map(|key| {
                let storage_key = self.storage_key(key);
                state.read_entry(&storage_key, now, self.config.enable_lru_eviction)
            })
            .collect();

        Ok(values)
    }

    async fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) -> StoreResult<()> {
        let storage_key = self.storage_key(&key);
        let ttl = self.effective_ttl(ttl);
        let mut state = self.state.write().await;
        state.insert_entry(storage_key, value, ttl, self.config.max_entries)
    }

    async fn set_many(
        &self,
        entries: Vec<(CacheKey, V)>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;

        for (key, value) in entries {
            let storage_key = self.storage_key(&key);
            let ttl = self.effective_ttl(ttl);
            state.insert_entry(storage_key, value, ttl, self.config.max_entries)?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let storage_key = self.storage_key(key);
        let mut state = self.state.write().await;

        let removed = state.remove_entry(&storage_key);
        if removed {
            state.record(StoreEvent::Invalidated(1));
            debug!("Removed cache entry: {}", storage_key);
        }
        Ok(removed)
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let mut removed = 0u64;

        for key in keys {
            if state.remove_entry(&self.storage_key(key)) {
                removed += 1;
            }
        }

        state.record(StoreEvent::Invalidated(removed));
        debug!("Removed {} of {} cache entries", removed, keys.len());
        Ok(removed > 0)
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut state = self.state.write().await;

        let count = match self.prefix() {
            Some(prefix) => {
                let owned: Vec<CacheKey> = state
                    .entries
                    .keys()
                    .filter(|key| key.starts_with(&prefix))
                    .cloned()
                    .collect();
                for key in &owned {
                    state.entries.remove(key);
                    state.recency.forget(key);
                }
                owned.len()
            }
            None => {
                let count = state.entries.len();
                state.entries.clear();
                state.recency = Recency::default();
                count
            }
        };

        state.sync_entries();
        state.record(StoreEvent::Invalidated(count as u64));

        info!(
            "Cleared {} entries from cache (namespace: {:?})",
            count, self.namespace
        );
        Ok(())
    }
}

/// Background task for automatic cleanup of expired records
pub async fn start_auto_cleanup<V>(store: MemoryStore<V>) {
    let interval = store.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        match store.cleanup_expired().await {
            Ok(0) => {}
            Ok(removed) => debug!("Auto cleanup removed {} entries", removed),
            Err(e) => warn!("Auto cleanup failed: {}", e),
        }
    }
}
