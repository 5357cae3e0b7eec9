use std::{fmt, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;

/// Remembers when each endpoint was last called.
#[async_trait]
pub trait LastCallStore: Send + Sync + fmt::Debug {
    /// Last recorded call to `key`, in epoch milliseconds.
    async fn last_call(&self, key: &str) -> Option<u64>;

    /// Record a call to `key` at `at_ms`.
    async fn record_call(&self, key: &str, at_ms: u64);
}

/// Process local [`LastCallStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryLastCallStore {
    calls: Arc<DashMap<String, u64>>,
}

impl InMemoryLastCallStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LastCallStore for InMemoryLastCallStore {
    async fn last_call(&self, key: &str) -> Option<u64> {
        self.calls.get(key).map(|at| *at)
    }

    async fn record_call(&self, key: &str, at_ms: u64) {
        // never move backwards
        self.calls
            .entry(key.to_owned())
            .and_modify(|at| *at = (*at).max(at_ms))
            .or_insert(at_ms);
    }
}
