//! Health probes
//!
//! Produces the liveness view the transport layer's endpoint serves:
//! event log, repository, and adapter connections. No internal details
//! leave this struct; the boundary only sees booleans.

use std::sync::Arc;

use serde::Serialize;

use crate::adapter::AdapterRegistry;
use crate::event_log::EventLog;
use crate::persistence::Database;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub event_log: bool,
    pub repository: bool,
    pub adapters: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.event_log && self.repository && self.adapters
    }
}

pub struct HealthChecker {
    log: Arc<dyn EventLog>,
    database: Option<Arc<Database>>,
    adapters: Arc<AdapterRegistry>,
    registry: Arc<crate::runs::RunRegistry>,
}

impl HealthChecker {
    pub fn new(
        log: Arc<dyn EventLog>,
        database: Option<Arc<Database>>,
        adapters: Arc<AdapterRegistry>,
        registry: Arc<crate::runs::RunRegistry>,
    ) -> Self {
        Self {
            log,
            database,
            adapters,
            registry,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let event_log = self.log.read_from(0, 1).await.is_ok();

        let repository = match &self.database {
            Some(database) => database.health_check().await.is_ok(),
            // The in-memory backend has no separate repository to probe.
            None => true,
        };

        // Every active run's adapter must report connected.
        let mut adapters = true;
        for run_id in self.registry.active_runs() {
            if let Some(adapter) = self.adapters.get(run_id) {
                if !adapter.is_connected().await {
                    adapters = false;
                    break;
                }
            }
        }

        HealthReport {
            event_log,
            repository,
            adapters,
        }
    }
}
