//! # Cache stores
//!
//! The loader keeps every cached value in a [`CacheStore`]. The store is the
//! only cache in the system: the batch coalescer keeps no results of its own,
//! so clearing or priming a key here is immediately visible to the next batch.
//!
//! [`MemoryStore`] is the bundled implementation: TTL expiry, LRU eviction,
//! namespaced views over one shared map, and hit/miss statistics. Remote
//! stores implement the same trait.
//!
//! ## Example
//!
//! ```rust
//! use cached_loader::store::{CacheStore, MemoryStore, StoreConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store: MemoryStore<String> = MemoryStore::new(StoreConfig::default());
//!
//! store.set("user:1".to_string(), "ada".to_string(), Some(Duration::from_secs(60))).await?;
//! assert_eq!(store.get("user:1").await?, Some("ada".to_string()));
//!
//! let users = store.namespaced("users");
//! users.set("1".to_string(), "grace".to_string(), None).await?;
//! users.clear().await?; // leaves "user:1" alone
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod memory;
pub mod types;

pub use config::{StoreConfig, StoreConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use memory::{start_auto_cleanup, MemoryStore};
pub use types::CacheStats;

use crate::error::StoreResult;
use crate::key::CacheKey;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Asynchronous key-value store backing the loader cache
///
/// `None` is the absent marker; every present record holds a real value.
/// A `ttl` of `None` on a write defers to the store's own expiry policy.
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Read one record
    async fn get(&self, key: &str) -> StoreResult<Option<V>>;

    /// Read many records; the result is positionally aligned with `keys`
    async fn get_many(&self, keys: &[CacheKey]) -> StoreResult<Vec<Option<V>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Write one record
    async fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write many records with a shared TTL
    async fn set_many(
        &self,
        entries: Vec<(CacheKey, V)>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    /// Delete one record; returns whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete many records; returns whether any existed
    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<bool> {
        let mut removed = false;
        for key in keys {
            removed |= self.delete(key).await?;
        }
        Ok(removed)
    }

    /// Delete every record this store owns
    async fn clear(&self) -> StoreResult<()>;
}

#[async_trait]
impl<V, S> CacheStore<V> for Arc<S>
where
    V: Send + Sync + 'static,
    S: CacheStore<V> + ?Sized,
{
    async fn get(&self, key: &str) -> StoreResult<Option<V>> {
        (**self).get(key).await
    }

    async fn get_many(&self, keys: &[CacheKey]) -> StoreResult<Vec<Option<V>>> {
        (**self).get_many(keys).await
    }

    async fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) -> StoreResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn set_many(
        &self,
        entries: Vec<(CacheKey, V)>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        (**self).set_many(entries, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key).await
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> StoreResult<bool> {
        (**self).delete_many(keys).await
    }

    async fn clear(&self) -> StoreResult<()> {
        (**self).clear().await
    }
}
