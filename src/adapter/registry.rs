//! Per-run adapter registry
//!
//! Runs in different modes trade through different adapters (live keys,
//! paper keys, per-run simulator). The RunManager registers the adapter for
//! a run at start and deregisters it on cleanup; the OrderManager resolves
//! adapters here at submit time.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::ExchangeAdapter;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<Uuid, Arc<dyn ExchangeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: Uuid, adapter: Arc<dyn ExchangeAdapter>) {
        self.adapters.insert(run_id, adapter);
    }

    /// Idempotent; unknown runs are a no-op.
    pub fn deregister(&self, run_id: Uuid) {
        self.adapters.remove(&run_id);
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<dyn ExchangeAdapter>> {
        self.adapters.get(&run_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
