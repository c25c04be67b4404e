//! System assembly
//!
//! Wires the components into one control plane: the event log backend, the
//! stores, the order manager, the run manager, the domain router and the
//! SSE broadcaster. The in-memory build serves tests and ephemeral runs;
//! the durable build bootstraps the schema and persists everything.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::adapter::{AdapterContext, AdapterLoader, AdapterRegistry, ExchangeAdapter};
use crate::config::{AppConfig, LogBackend};
use crate::event_log::{
    EventLog, MemoryEventLog, MemoryOffsetStore, OffsetStore, PgEventLog, PgOffsetStore,
};
use crate::health::HealthChecker;
use crate::orders::{FillPoller, OrderManager, PollerConfig};
use crate::persistence::{
    schema, BarStore, Database, MemoryBarStore, MemoryOrderStore, MemoryRunStore, OrderStore,
    PgBarStore, PgOrderStore, PgRunStore, RunStore,
};
use crate::router::DomainRouter;
use crate::runs::{ExchangeFactory, RunError, RunManager, RunMode, RunRegistry};
use crate::sse::SseBroadcaster;
use crate::strategy::StrategyLoader;

pub struct Weaver {
    pub config: AppConfig,
    pub log: Arc<dyn EventLog>,
    pub database: Option<Arc<Database>>,
    pub offsets: Arc<dyn OffsetStore>,
    pub bar_store: Arc<dyn BarStore>,
    pub order_manager: Arc<OrderManager>,
    pub run_manager: Arc<RunManager>,
    pub adapters: Arc<AdapterRegistry>,
    pub run_registry: Arc<RunRegistry>,
    pub router: Arc<DomainRouter>,
    pub sse: Arc<SseBroadcaster>,
    pub health: Arc<HealthChecker>,
}

impl Weaver {
    /// Build against the configured backend. The durable backend connects
    /// to PostgreSQL and applies the schema.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        match config.event_log.backend {
            LogBackend::InMemory => Ok(Self::build_in_memory(config)),
            LogBackend::Durable => {
                let database = Arc::new(Database::connect(&config.database.url).await?);
                schema::bootstrap(database.pool()).await?;
                let pool = database.pool().clone();

                let log: Arc<dyn EventLog> = Arc::new(PgEventLog::new(pool.clone()));
                let offsets: Arc<dyn OffsetStore> = Arc::new(PgOffsetStore::new(pool.clone()));
                let run_store: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));
                let order_store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
                let bar_store: Arc<dyn BarStore> = Arc::new(PgBarStore::new(pool));

                Ok(Self::assemble(
                    config,
                    log,
                    Some(database),
                    offsets,
                    run_store,
                    order_store,
                    bar_store,
                    None,
                ))
            }
        }
    }

    /// All state in process memory. The reference wiring for tests.
    pub fn build_in_memory(config: AppConfig) -> Self {
        Self::build_in_memory_with_factory(config, None)
    }

    /// In-memory build with a custom exchange factory (tests inject mocks).
    pub fn build_in_memory_with_factory(
        config: AppConfig,
        exchange_factory: Option<ExchangeFactory>,
    ) -> Self {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
        let offsets: Arc<dyn OffsetStore> = Arc::new(MemoryOffsetStore::new());
        let run_store: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
        let order_store: Arc<dyn OrderStore> = Arc::new(MemoryOrderStore::new());
        let bar_store: Arc<dyn BarStore> = Arc::new(MemoryBarStore::new());
        Self::assemble(
            config,
            log,
            None,
            offsets,
            run_store,
            order_store,
            bar_store,
            exchange_factory,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: AppConfig,
        log: Arc<dyn EventLog>,
        database: Option<Arc<Database>>,
        offsets: Arc<dyn OffsetStore>,
        run_store: Arc<dyn RunStore>,
        order_store: Arc<dyn OrderStore>,
        bar_store: Arc<dyn BarStore>,
        exchange_factory: Option<ExchangeFactory>,
    ) -> Self {
        let adapters = Arc::new(AdapterRegistry::new());
        let run_registry = Arc::new(RunRegistry::new());

        let order_manager = Arc::new(OrderManager::new(
            order_store,
            log.clone(),
            adapters.clone(),
            config.order_manager_config(),
        ));

        let loader = Arc::new(StrategyLoader::new(
            config.strategies.plugin_dir.as_ref().map(PathBuf::from),
        ));

        let exchange_factory =
            exchange_factory.unwrap_or_else(|| alpaca_factory(&config));

        let run_manager = Arc::new(RunManager::new(
            run_store,
            bar_store.clone(),
            log.clone(),
            order_manager.clone(),
            adapters.clone(),
            run_registry.clone(),
            loader,
            exchange_factory,
            config.run_manager_config(),
        ));

        // Singletons wired at startup: the router is the single point of
        // mode-specific dispatch, the broadcaster the single log-to-wire
        // bridge.
        let router = Arc::new(DomainRouter::new(log.clone(), run_registry.clone()));
        router.start();
        let sse = Arc::new(SseBroadcaster::new(log.clone()));
        sse.start();

        let health = Arc::new(HealthChecker::new(
            log.clone(),
            database.clone(),
            adapters.clone(),
            run_registry.clone(),
        ));

        info!(backend = ?config.event_log.backend, "Control plane assembled");
        Self {
            config,
            log,
            database,
            offsets,
            bar_store,
            order_manager,
            run_manager,
            adapters,
            run_registry,
            router,
            sse,
            health,
        }
    }

    /// Launch the fill reconciliation worker.
    pub fn spawn_fill_poller(
        &self,
        stop_rx: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let poller = FillPoller::new(self.order_manager.clone(), PollerConfig::default());
        tokio::spawn(async move { poller.run(stop_rx).await })
    }

    /// Stop all runs and detach the singletons.
    pub async fn shutdown(&self) {
        self.run_manager.stop_all().await;
        self.router.stop();
        self.sse.stop();
        info!("Control plane shut down");
    }
}

/// Production exchange factory: one Alpaca credential set per mode,
/// instantiated through the adapter plugin loader.
fn alpaca_factory(config: &AppConfig) -> ExchangeFactory {
    let live = config.alpaca.live.clone();
    let paper = config.alpaca.paper.clone();
    let loader = Arc::new(AdapterLoader::new(None));
    Arc::new(move |mode: RunMode| {
        let (name, credentials) = match mode {
            RunMode::Live => ("alpaca-live", live.clone()),
            RunMode::Paper => ("alpaca-paper", paper.clone()),
            RunMode::Backtest => {
                return Err(RunError::Validation(
                    "backtest runs use the simulated exchange".to_string(),
                ))
            }
        };
        if credentials.is_none() {
            return Err(RunError::MissingCredentials(mode.to_string()));
        }
        let adapter: Arc<dyn ExchangeAdapter> = loader
            .load(
                "alpaca",
                &AdapterContext {
                    name: name.to_string(),
                    credentials,
                },
            )
            .map_err(|e| RunError::Validation(e.to_string()))?;
        Ok(adapter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_build_is_healthy() {
        let weaver = Weaver::build_in_memory(AppConfig::default());
        assert!(weaver.health.report().await.healthy());
        assert_eq!(weaver.run_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_typed_error() {
        let weaver = Weaver::build_in_memory(AppConfig::default());
        // No Alpaca credentials configured: a paper run cannot start.
        let factory = alpaca_factory(&weaver.config);
        let err = factory(RunMode::Paper).unwrap_err();
        assert!(matches!(err, RunError::MissingCredentials(_)));
    }
}
