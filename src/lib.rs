//! # cached-loader
//!
//! A batching and caching request coalescer.
//!
//! ## Features
//!
//! - Per-key `load` API backed by one batch function call per scheduling tick
//! - TTL cache in front of the batch function; only uncached keys go upstream
//! - Order-preserving results, duplicate keys included
//! - Per-key faults that are never cached, and batch-wide failures that fan out
//! - Awaited `prime` / `clear` / `clear_many` / `clear_all` chaining
//! - Pluggable cache key normalization and cache stores
//!
//! ## Loading
//!
//! ```no_run
//! use cached_loader::{BatchResult, CachedLoader, Fault};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loader = CachedLoader::<u64, String, _>::builder(|ids: Vec<u64>| async move {
//!         let users: BatchResult<String> = Ok(ids
//!             .into_iter()
//!             .map(|id| {
//!                 if id == 0 {
//!                     Err(Fault::new("no user 0"))
//!                 } else {
//!                     Ok(format!("user-{}", id))
//!                 }
//!             })
//!             .collect());
//!         users
//!     })
//!     .ttl(Duration::from_secs(60))
//!     .build()?;
//!
//!     // Both keys reach the batch function in one call
//!     let (a, b) = tokio::join!(loader.load(&1), loader.load(&2));
//!     println!("{} {}", a?, b?);
//!
//!     // Cached now; no upstream call
//!     let again = loader.load_many(&[1, 2, 0]).await;
//!     assert!(again[2].is_err());
//!     Ok(())
//! }
//! ```
//!
//! ## Priming and invalidation
//!
//! ```no_run
//! use cached_loader::{BatchResult, CachedLoader};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let loader: CachedLoader<String, usize, _> = CachedLoader::new(|keys: Vec<String>| async move {
//!     let lengths: BatchResult<usize> = Ok(keys.iter().map(|k| Ok(k.len())).collect());
//!     lengths
//! });
//!
//! let key = "hello".to_string();
//! loader.prime_value(&key, 42).await?;
//! assert_eq!(loader.load(&key).await?, 42);
//!
//! loader.clear(&key).await?.prime_value(&key, 7).await?;
//! assert_eq!(loader.load(&key).await?, 7);
//!
//! loader.clear_all().await?;
//! assert_eq!(loader.load(&key).await?, 5);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod key;
pub mod loader;
pub mod store;

// Re-export main types for convenience
pub use error::{Fault, LoaderError, Result, StoreError, StoreResult};
pub use key::{CacheKey, CacheKeyBuilder, CacheKeyFn, DisplayKey, JsonKey};
pub use loader::{
    BatchFn, BatchOptions, BatchResult, CachedLoader, LoaderBuilder, LoaderConfig, LoaderStats,
};
pub use store::{CacheStats, CacheStore, MemoryStore, StoreConfig};
