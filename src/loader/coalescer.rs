//! Tick-based batch coalescer
//!
//! Requests queued before the current batch is drained form one batch. The
//! first request of a tick becomes the batch leader: it yields once (or
//! sleeps for the configured delay) inside the caller's own task and then
//! drains the queue. Futures joined in the same task therefore always share
//! a batch, whatever runtime flavor drives them. The drained batch is split
//! by `max_batch_size` and each chunk goes to the resolver in one call.
//!
//! The coalescer keeps no result cache. Duplicate keys stay duplicated and
//! each request gets its own positional result. The only per-key state is
//! the primed fault registry: faults never reach the store, so a primed
//! fault is held here and answers exactly one `load`.

use crate::error::{Fault, LoaderError, Result};
use crate::key::CacheKey;
use crate::loader::config::BatchOptions;
use crate::loader::resolver::Resolve;
use crate::loader::stats::StatsCounters;
use futures::future::join_all;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) struct Coalescer<K, V, R> {
    shared: Arc<Shared<K, V, R>>,
}

impl<K, V, R> Clone for Coalescer<K, V, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<K, V, R> {
    resolver: R,
    options: BatchOptions,
    stats: Arc<StatsCounters>,
    state: Mutex<State<K, V>>,
    _value: PhantomData<fn() -> V>,
}

struct State<K, V> {
    pending: Vec<Pending<K, V>>,
    dispatch_scheduled: bool,
    primed_faults: HashMap<CacheKey, Fault>,
}

struct Pending<K, V> {
    key: K,
    tx: oneshot::Sender<Result<V>>,
}

/// Where a queued request gets its result from
enum Slot<V> {
    Ready(Result<V>),
    Waiting(oneshot::Receiver<Result<V>>),
}

impl<V> Slot<V> {
    async fn wait(self) -> Result<V> {
        match self {
            Slot::Ready(result) => result,
            Slot::Waiting(rx) => rx.await.unwrap_or(Err(LoaderError::Cancelled)),
        }
    }
}

/// Duty to drain the queue, held by the request that opened the batch
///
/// If the leading future is dropped before draining, the duty moves to a
/// spawned task so the other waiters of the batch still get their results.
struct Leader<K, V, R>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Resolve<K, V>,
{
    shared: Arc<Shared<K, V, R>>,
    armed: bool,
}

impl<K, V, R> Leader<K, V, R>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Resolve<K, V>,
{
    /// Close the batch after one tick, then resolve it in its own task
    ///
    /// The resolver call runs detached, so a leader dropped mid-flight does
    /// not cancel the other waiters of its batch.
    async fn run(mut self) {
        self.shared.wait_for_tick().await;
        let batch = self.shared.take_pending();
        self.armed = false;

        if !batch.is_empty() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.dispatch(batch).await });
        }
    }
}

impl<K, V, R> Drop for Leader<K, V, R>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Resolve<K, V>,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                debug!("Batch leader dropped, handing dispatch to a task");
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    shared.wait_for_tick().await;
                    let batch = shared.take_pending();
                    shared.dispatch(batch).await;
                });
            }
            Err(_) => {
                warn!("Batch leader dropped outside a runtime, cancelling queued loads");
                // Dropping the senders resolves every waiter with `Cancelled`
                drop(self.shared.take_pending());
            }
        }
    }
}

impl<K, V, R> Coalescer<K, V, R>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Resolve<K, V>,
{
    pub(crate) fn new(resolver: R, options: BatchOptions, stats: Arc<StatsCounters>) -> Self {
        let state = State {
            pending: Vec::new(),
            dispatch_scheduled: false,
            primed_faults: HashMap::new(),
        };

        Self {
            shared: Arc::new(Shared {
                resolver,
                options,
                stats,
                state: Mutex::new(state),
                _value: PhantomData,
            }),
        }
    }

    pub(crate) fn resolver(&self) -> &R {
        &self.shared.resolver
    }

    /// Queue `key` into the current batch and wait for its result
    ///
    /// Must be called within a tokio runtime.
    pub(crate) async fn load(&self, key: K) -> Result<V> {
        let (slots, leader) = self.enqueue(vec![key]);
        if let Some(leader) = leader {
            leader.run().await;
        }

        match slots.into_iter().next() {
            Some(slot) => slot.wait().await,
            None => Err(LoaderError::Invariant("no slot queued for load".to_string())),
        }
    }

    /// Queue every key into the current batch at once; results follow `keys`
    pub(crate) async fn load_many(&self, keys: Vec<K>) -> Vec<Result<V>> {
        let (slots, leader) = self.enqueue(keys);
        if let Some(leader) = leader {
            leader.run().await;
        }

        join_all(slots.into_iter().map(Slot::wait)).await
    }

    /// Register a fault for the next `load` of `cache_key`, replacing an earlier one
    pub(crate) fn prime_fault(&self, cache_key: CacheKey, fault: Fault) {
        self.shared.lock().primed_faults.insert(cache_key, fault);
    }

    pub(crate) fn clear(&self, cache_key: &str) {
        self.shared.lock().primed_faults.remove(cache_key);
    }

    pub(crate) fn clear_all(&self) {
        self.shared.lock().primed_faults.clear();
    }

    fn enqueue(&self, keys: Vec<K>) -> (Vec<Slot<V>>, Option<Leader<K, V, R>>) {
        let mut state = self.shared.lock();
        let mut slots = Vec::with_capacity(keys.len());
        let mut queued = false;

        for key in keys {
            if !state.primed_faults.is_empty() {
                let cache_key = self.shared.resolver.cache_key(&key);
                if let Some(fault) = state.primed_faults.remove(&cache_key) {
                    debug!("Serving primed fault for {}", cache_key);
                    StatsCounters::add(&self.shared.stats.primed_hits, 1);
                    slots.push(Slot::Ready(Err(LoaderError::Fault(fault))));
                    continue;
                }
            }

            let (tx, rx) = oneshot::channel();
            state.pending.push(Pending { key, tx });
            slots.push(Slot::Waiting(rx));
            queued = true;
        }

        let leader = if queued && !state.dispatch_scheduled {
            state.dispatch_scheduled = true;
            Some(Leader {
                shared: Arc::clone(&self.shared),
                armed: true,
            })
        } else {
            None
        };

        (slots, leader)
    }
}

impl<K, V, R> Shared<K, V, R>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: Resolve<K, V>,
{
    fn lock(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_for_tick(&self) {
        if self.options.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.options.delay).await;
        }
    }

    fn take_pending(&self) -> Vec<Pending<K, V>> {
        let mut state = self.lock();
        state.dispatch_scheduled = false;
        std::mem::take(&mut state.pending)
    }

    async fn dispatch(&self, mut batch: Vec<Pending<K, V>>) {
        if batch.is_empty() {
            return;
        }

        let chunk_size = self.options.max_batch_size.unwrap_or(batch.len()).max(1);
        let mut chunks = Vec::new();
        while !batch.is_empty() {
            let rest = batch.split_off(chunk_size.min(batch.len()));
            chunks.push(std::mem::replace(&mut batch, rest));
        }

        debug!(
            "Dispatching {} requests in {} batch(es)",
            chunks.iter().map(Vec::len).sum::<usize>(),
            chunks.len()
        );
        join_all(chunks.into_iter().map(|chunk| self.run_batch(chunk))).await;
    }

    async fn run_batch(&self, batch: Vec<Pending<K, V>>) {
        let (keys, senders): (Vec<K>, Vec<_>) = batch.into_iter().map(|p| (p.key, p.tx)).unzip();

        StatsCounters::add(&self.stats.batches, 1);

        match self.resolver.resolve(&keys).await {
            Ok(results) if results.len() == senders.len() => {
                for (tx, result) in senders.into_iter().zip(results) {
                    // Receiver gone means the caller stopped waiting
                    let _ = tx.send(result);
                }
            }
            Ok(results) => {
                let error = LoaderError::Invariant(format!(
                    "resolver returned {} results for {} keys",
                    results.len(),
                    senders.len()
                ));
                for tx in senders {
                    let _ = tx.send(Err(error.clone()));
                }
            }
            Err(error) => {
                debug!("Batch of {} keys failed: {}", keys.len(), error);
                for tx in senders {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }
}
