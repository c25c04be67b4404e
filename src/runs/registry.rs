//! Shared registry of active runs and their modes
//!
//! Maintained by the RunManager, consulted by the DomainRouter on every
//! `strategy.*` event. Kept separate from the run store so routing never
//! touches the database.

use dashmap::DashMap;
use uuid::Uuid;

use super::types::RunMode;

#[derive(Default)]
pub struct RunRegistry {
    modes: DashMap<Uuid, RunMode>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run_id: Uuid, mode: RunMode) {
        self.modes.insert(run_id, mode);
    }

    /// Idempotent; unknown runs are a no-op.
    pub fn remove(&self, run_id: Uuid) {
        self.modes.remove(&run_id);
    }

    pub fn mode_of(&self, run_id: Uuid) -> Option<RunMode> {
        self.modes.get(&run_id).map(|entry| *entry.value())
    }

    pub fn active_runs(&self) -> Vec<Uuid> {
        self.modes.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_roundtrip() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        assert!(registry.mode_of(run_id).is_none());

        registry.insert(run_id, RunMode::Backtest);
        assert_eq!(registry.mode_of(run_id), Some(RunMode::Backtest));
        assert_eq!(registry.len(), 1);

        registry.remove(run_id);
        registry.remove(run_id);
        assert!(registry.is_empty());
    }
}
