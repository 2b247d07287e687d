//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use cached_loader::{BatchFn, BatchResult, Fault};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Every key list the upstream function was called with
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Vec<String>>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Vec<String>> {
        self.0.lock().unwrap().last().cloned()
    }

    fn record(&self, keys: &[String]) {
        self.0.lock().unwrap().push(keys.to_vec());
    }
}

/// Upstream batch function backed by a fixed table or by echoing keys
///
/// Table mode: unknown keys fault with code `not_found`.
/// Echo mode: `k` resolves to `k.to_uppercase()`, keys starting with
/// `missing` fault.
pub struct Upstream {
    table: Option<HashMap<String, String>>,
    log: CallLog,
    fail_batches: Arc<AtomicBool>,
}

impl Upstream {
    pub fn table(pairs: &[(&str, &str)]) -> (Self, CallLog) {
        let table = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::build(Some(table))
    }

    pub fn echo() -> (Self, CallLog) {
        Self::build(None)
    }

    /// Switch that makes every call fail as a whole while set
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_batches)
    }

    fn build(table: Option<HashMap<String, String>>) -> (Self, CallLog) {
        let log = CallLog::default();
        let upstream = Self {
            table,
            log: log.clone(),
            fail_batches: Arc::new(AtomicBool::new(false)),
        };
        (upstream, log)
    }

    fn resolve_one(&self, key: &str) -> Result<String, Fault> {
        match &self.table {
            Some(table) => table
                .get(key)
                .cloned()
                .ok_or_else(|| Fault::new(format!("{} not found", key)).with_code("not_found")),
            None if key.starts_with("missing") => Err(Fault::new(format!("{} not found", key))),
            None => Ok(key.to_uppercase()),
        }
    }
}

#[async_trait]
impl BatchFn<String, String> for Upstream {
    async fn load(&self, keys: &[String]) -> BatchResult<String> {
        self.log.record(keys);

        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(Fault::new("upstream unavailable"));
        }

        Ok(keys.iter().map(|key| self.resolve_one(key)).collect())
    }
}

/// Owned key list
pub fn keys(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|k| k.to_string()).collect()
}
