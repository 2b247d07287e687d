//! Loader behaviour against shared, dynamic and failing stores

mod common;

use async_trait::async_trait;
use cached_loader::loader::config::{ENV_MAX_BATCH_SIZE, ENV_NAMESPACE, ENV_TTL_MS};
use cached_loader::{
    CacheKey, CacheStore, CachedLoader, LoaderBuilder, LoaderConfig, LoaderError, MemoryStore,
    StoreConfig, StoreError, StoreResult,
};
use common::{init_tracing, keys, Upstream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory store whose reads and writes can be made to fail
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryStore<String>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl FlakyStore {
    fn check(flag: &AtomicBool, op: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{} refused", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore<String> for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Self::check(&self.fail_reads, "get")?;
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[CacheKey]) -> StoreResult<Vec<Option<String>>> {
        Self::check(&self.fail_reads, "get_many")?;
        self.inner.get_many(keys).await
    }

    async fn set(&self, key: CacheKey, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        Self::check(&self.fail_writes, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_many(
        &self,
        entries: Vec<(CacheKey, String)>,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        Self::check(&self.fail_writes, "set_many")?;
        self.inner.set_many(entries, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Self::check(&self.fail_writes, "delete")?;
        self.inner.delete(key).await
    }

    async fn clear(&self) -> StoreResult<()> {
        Self::check(&self.fail_writes, "clear")?;
        self.inner.clear().await
    }
}

#[tokio::test]
async fn test_namespaced_loaders_share_one_store() {
    init_tracing();
    let shared: MemoryStore<String> = MemoryStore::new(StoreConfig::default());

    let (users_fn, users_log) = Upstream::echo();
    let users: CachedLoader<String, String, Upstream> = LoaderBuilder::new(users_fn)
        .store(shared.namespaced("users"))
        .build()
        .unwrap();

    let (posts_fn, posts_log) = Upstream::echo();
    let posts: CachedLoader<String, String, Upstream> = LoaderBuilder::new(posts_fn)
        .store(shared.namespaced("posts"))
        .build()
        .unwrap();

    let id = "1".to_string();
    users.load(&id).await.unwrap();
    posts.load(&id).await.unwrap();
    assert_eq!(shared.len().await, 2);

    users.clear_all().await.unwrap();

    assert_eq!(shared.len().await, 1);
    assert!(!users.store().contains_key("1").await);
    assert!(posts.store().contains_key("1").await);

    posts.load(&id).await.unwrap();
    assert_eq!(posts_log.count(), 1);

    users.load(&id).await.unwrap();
    assert_eq!(users_log.count(), 2);
}

#[tokio::test]
async fn test_trait_object_store() {
    init_tracing();
    let memory: MemoryStore<String> = MemoryStore::new(StoreConfig::small());
    let store: Arc<dyn CacheStore<String>> = Arc::new(memory.clone());

    let (upstream, log) = Upstream::echo();
    let loader: CachedLoader<String, String, Upstream, Arc<dyn CacheStore<String>>> =
        LoaderBuilder::new(upstream).store(store).build().unwrap();

    let results = loader.load_many(&keys(&["a", "b"])).await;
    assert_eq!(results, vec![Ok("A".to_string()), Ok("B".to_string())]);
    assert_eq!(memory.get("a").await.unwrap(), Some("A".to_string()));

    loader.clear_many(&keys(&["a", "b"])).await.unwrap();
    assert!(memory.is_empty().await);

    loader.load(&"a".to_string()).await.unwrap();
    assert_eq!(log.count(), 2);
}

#[tokio::test]
async fn test_cache_read_failure_fails_batch_without_upstream_call() {
    init_tracing();
    let store = FlakyStore::default();
    store.fail_reads.store(true, Ordering::SeqCst);

    let (upstream, log) = Upstream::echo();
    let loader: CachedLoader<String, String, Upstream, FlakyStore> =
        LoaderBuilder::new(upstream).store(store.clone()).build().unwrap();

    let results = loader.load_many(&keys(&["a", "b"])).await;

    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(err, LoaderError::CacheRead(StoreError::Backend(_))));
        assert!(err.is_batch_wide());
    }
    assert_eq!(log.count(), 0);

    // prime checks the store first and surfaces the failure
    let primed = loader.prime_value(&"a".to_string(), "x".to_string()).await;
    assert!(matches!(primed, Err(LoaderError::Store(_))));
}

#[tokio::test]
async fn test_cache_write_failure_is_reported_and_not_cached() {
    init_tracing();
    let store = FlakyStore::default();
    store.fail_writes.store(true, Ordering::SeqCst);

    let (upstream, log) = Upstream::echo();
    let loader: CachedLoader<String, String, Upstream, FlakyStore> =
        LoaderBuilder::new(upstream).store(store.clone()).build().unwrap();

    let (k_ok, k_missing) = ("a".to_string(), "missing-a".to_string());
    let (ok, missing) = tokio::join!(loader.load(&k_ok), loader.load(&k_missing));

    assert!(matches!(ok, Err(LoaderError::CacheWrite(_))));
    // Faults are never written, so the failed write does not touch them
    assert!(matches!(missing, Err(LoaderError::Fault(_))));
    assert_eq!(loader.stats().write_failures, 1);
    assert!(store.inner.is_empty().await);

    store.fail_writes.store(false, Ordering::SeqCst);

    assert_eq!(loader.load(&"a".to_string()).await.unwrap(), "A");
    assert_eq!(loader.load(&"a".to_string()).await.unwrap(), "A");
    assert_eq!(log.count(), 2);
}

#[tokio::test]
async fn test_config_from_environment() {
    init_tracing();
    std::env::set_var(ENV_TTL_MS, "60000");
    std::env::set_var(ENV_MAX_BATCH_SIZE, "2");
    std::env::set_var(ENV_NAMESPACE, "env");

    let config = LoaderConfig::from_env().unwrap();
    assert_eq!(config.ttl, Some(Duration::from_secs(60)));
    assert_eq!(config.batch.max_batch_size, Some(2));

    let (upstream, log) = Upstream::echo();
    let loader: CachedLoader<String, String, Upstream> =
        CachedLoader::with_config(upstream, config).unwrap();

    assert_eq!(loader.store().namespace(), Some("env"));
    loader.load_many(&keys(&["a", "b", "c"])).await;
    assert_eq!(log.calls(), vec![keys(&["a", "b"]), keys(&["c"])]);

    std::env::set_var(ENV_MAX_BATCH_SIZE, "lots");
    assert!(matches!(LoaderConfig::from_env(), Err(LoaderError::Config(_))));

    std::env::remove_var(ENV_TTL_MS);
    std::env::remove_var(ENV_MAX_BATCH_SIZE);
    std::env::remove_var(ENV_NAMESPACE);
}
