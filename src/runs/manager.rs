//! Run manager - authoritative lifecycle of all runs
//!
//! Owns run creation, start, stop, completion and cleanup. Each started run
//! gets a RunContext: its clock, its strategy runner, its execution side
//! (backtest engine or live bridge), its adapter registration and an error
//! channel. The spawned run loop has one structured exit path regardless of
//! mode: completion, stop, or error, always followed by cleanup. A run left
//! in RUNNING with no live context is a correctness failure, so every loop
//! exit transitions the persisted status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::bridge::LiveBridge;
use super::error::RunError;
use super::registry::RunRegistry;
use super::types::{Run, RunMode, RunSpec, RunStatus};
use crate::adapter::{AdapterError, AdapterRegistry, ExchangeAdapter};
use crate::backtest::{BacktestEngine, BacktestEngineConfig};
use crate::clock::{BacktestClock, Clock, ClockOutcome, RealtimeClock};
use crate::event_log::EventLog;
use crate::events::{event_types, ClockTickPayload, Envelope, RunEventPayload, RunStatsPayload};
use crate::orders::OrderManager;
use crate::persistence::{BarStore, RunStore};
use crate::strategy::{StrategyContext, StrategyLoader, StrategyRunner};

const PRODUCER: &str = "run_manager";
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);

/// Builds the exchange adapter for a paper or live run. Lets the binary
/// wire Alpaca credentials while tests wire mocks.
pub type ExchangeFactory =
    Arc<dyn Fn(RunMode) -> Result<Arc<dyn ExchangeAdapter>, RunError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RunManagerConfig {
    /// Per-tick handler timeout.
    pub callback_timeout: Duration,
    /// How long `stop` waits for the run loop before forcing release.
    pub stop_grace: Duration,
    pub engine: BacktestEngineConfig,
}

impl Default for RunManagerConfig {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            engine: BacktestEngineConfig::default(),
        }
    }
}

struct RunHandle {
    clock: Arc<dyn Clock>,
    join: Mutex<Option<JoinHandle<()>>>,
}

pub struct RunManager {
    store: Arc<dyn RunStore>,
    bar_store: Arc<dyn BarStore>,
    log: Arc<dyn EventLog>,
    order_manager: Arc<OrderManager>,
    adapters: Arc<AdapterRegistry>,
    registry: Arc<RunRegistry>,
    loader: Arc<StrategyLoader>,
    exchange_factory: ExchangeFactory,
    config: RunManagerConfig,
    contexts: Arc<DashMap<Uuid, RunHandle>>,
}

impl RunManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RunStore>,
        bar_store: Arc<dyn BarStore>,
        log: Arc<dyn EventLog>,
        order_manager: Arc<OrderManager>,
        adapters: Arc<AdapterRegistry>,
        registry: Arc<RunRegistry>,
        loader: Arc<StrategyLoader>,
        exchange_factory: ExchangeFactory,
        config: RunManagerConfig,
    ) -> Self {
        Self {
            store,
            bar_store,
            log,
            order_manager,
            adapters,
            registry,
            loader,
            exchange_factory,
            config,
            contexts: Arc::new(DashMap::new()),
        }
    }

    /// Validate and persist a new run in PENDING.
    pub async fn create(&self, spec: &RunSpec) -> Result<Run, RunError> {
        spec.validate()?;
        let run = Run::from_spec(spec);
        self.store.insert(&run).await?;
        emit_run_event(&self.log, event_types::RUN_CREATED, &run, None).await?;
        info!(run_id = %run.id, mode = %run.mode, strategy = %run.strategy_id, "Run created");
        Ok(run)
    }

    /// Start a pending run: build its RunContext and launch the run loop.
    pub async fn start(&self, run_id: Uuid) -> Result<Run, RunError> {
        let mut run = self
            .store
            .get(run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))?;
        if run.status != RunStatus::Pending {
            return Err(RunError::NotStartable {
                run_id,
                status: run.status,
            });
        }

        let ctx = StrategyContext {
            symbols: run.symbols.clone(),
            timeframe: run.timeframe,
        };
        let strategy = self.loader.load(&run.strategy_id, &ctx).await?;
        self.registry.insert(run.id, run.mode);

        let (error_tx, error_rx) = mpsc::unbounded_channel::<String>();

        // Assemble the mode-specific context. Unwind shared registrations
        // if any step fails.
        let assembled: Result<AssembledContext, RunError> = match run.mode {
            RunMode::Backtest => {
                let engine = match BacktestEngine::new(
                    &run,
                    self.config.engine.clone(),
                    self.bar_store.clone(),
                    self.log.clone(),
                    self.order_manager.clone(),
                ) {
                    Ok(engine) => engine,
                    Err(e) => {
                        self.registry.remove(run.id);
                        return Err(e);
                    }
                };
                self.adapters.register(run.id, engine.sim_adapter());

                // The engine subscribes before the strategy runner so its
                // cursor is advanced when strategies act on a tick.
                match engine.initialize().await {
                    Ok(()) => {}
                    Err(e) => {
                        self.adapters.deregister(run.id);
                        self.registry.remove(run.id);
                        return Err(e);
                    }
                }

                let runner =
                    StrategyRunner::new(run.id, self.log.clone(), strategy, error_tx.clone());
                runner.initialize();

                let (start, end) = (
                    run.start_time.expect("validated backtest has start_time"),
                    run.end_time.expect("validated backtest has end_time"),
                );
                let clock: Arc<dyn Clock> = Arc::new(BacktestClock::new(
                    run.id,
                    run.timeframe,
                    start,
                    end,
                    self.config.callback_timeout,
                ));
                Ok(AssembledContext {
                    clock,
                    runner,
                    engine: Some(engine),
                    bridge: None,
                    probe_adapter: None,
                })
            }
            RunMode::Paper | RunMode::Live => {
                let adapter = match (self.exchange_factory)(run.mode) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        self.registry.remove(run.id);
                        return Err(e);
                    }
                };
                self.adapters.register(run.id, adapter.clone());

                let runner =
                    StrategyRunner::new(run.id, self.log.clone(), strategy, error_tx.clone());
                runner.initialize();

                let bridge = LiveBridge::new(
                    run.id,
                    run.timeframe,
                    self.log.clone(),
                    adapter.clone(),
                    self.order_manager.clone(),
                    error_tx.clone(),
                );
                bridge.initialize();

                let clock: Arc<dyn Clock> = Arc::new(RealtimeClock::new(
                    run.id,
                    run.timeframe,
                    self.config.callback_timeout,
                ));
                Ok(AssembledContext {
                    clock,
                    runner,
                    engine: None,
                    bridge: Some(bridge),
                    probe_adapter: Some(adapter),
                })
            }
        };
        let assembled = assembled?;

        // Every tick becomes a clock.Tick envelope; subscribers do the rest.
        let tick_log = self.log.clone();
        let tick_run_id = run.id;
        assembled.clock.on_tick(Arc::new(move |tick| {
            let log = tick_log.clone();
            Box::pin(async move {
                let payload = ClockTickPayload {
                    ts: tick.ts,
                    timeframe: tick.timeframe,
                    bar_index: tick.bar_index,
                    is_backtest: tick.is_backtest,
                };
                let envelope = Envelope::of("clock", &payload).with_run(tick_run_id);
                log.append(envelope).await?;
                Ok(())
            })
        }));

        run.transition(RunStatus::Running)?;
        self.store.update(&run).await?;
        emit_run_event(&self.log, event_types::RUN_STARTED, &run, None).await?;
        info!(run_id = %run.id, mode = %run.mode, "Run started");

        let loop_ctx = LoopContext {
            run_id: run.id,
            store: self.store.clone(),
            log: self.log.clone(),
            adapters: self.adapters.clone(),
            registry: self.registry.clone(),
            contexts: self.contexts.clone(),
            clock: assembled.clock.clone(),
            runner: assembled.runner,
            engine: assembled.engine,
            bridge: assembled.bridge,
            probe_adapter: assembled.probe_adapter,
            error_rx,
        };
        let join = tokio::spawn(run_loop(loop_ctx));
        self.contexts.insert(
            run.id,
            RunHandle {
                clock: assembled.clock,
                join: Mutex::new(Some(join)),
            },
        );

        Ok(run)
    }

    /// Request a stop. Idempotent for runs already stopped or terminal.
    pub async fn stop(&self, run_id: Uuid) -> Result<Run, RunError> {
        let run = self
            .store
            .get(run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        if run.status == RunStatus::Pending {
            return Err(RunError::IllegalTransition {
                run_id,
                from: run.status,
                to: RunStatus::Stopped,
            });
        }

        if let Some((_, handle)) = self.contexts.remove(&run_id) {
            handle.clock.stop();
            let join = handle.join.lock().expect("join lock").take();
            if let Some(mut join) = join {
                if tokio::time::timeout(self.config.stop_grace, &mut join)
                    .await
                    .is_err()
                {
                    warn!(
                        run_id = %run_id,
                        grace_secs = self.config.stop_grace.as_secs(),
                        "Run loop exceeded stop grace period; forcing release"
                    );
                    join.abort();
                }
            }
        }

        // Defensive: the loop removes these on its own exit paths, but a
        // forced release must not leak them.
        self.adapters.deregister(run_id);
        self.registry.remove(run_id);

        let mut run = self
            .store
            .get(run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))?;
        if !run.status.is_terminal() {
            run.transition(RunStatus::Stopped)?;
            self.store.update(&run).await?;
            emit_run_event(&self.log, event_types::RUN_STOPPED, &run, None).await?;
            info!(run_id = %run_id, "Run stopped");
        }
        Ok(run)
    }

    /// Stop every active run. Used at shutdown.
    pub async fn stop_all(&self) {
        let active: Vec<Uuid> = self.contexts.iter().map(|entry| *entry.key()).collect();
        for run_id in active {
            if let Err(e) = self.stop(run_id).await {
                error!(run_id = %run_id, error = %e, "Stop during shutdown failed");
            }
        }
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Run, RunError> {
        self.store
            .get(run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))
    }

    pub async fn list(
        &self,
        mode: Option<RunMode>,
        status: Option<RunStatus>,
    ) -> Result<Vec<Run>, RunError> {
        Ok(self.store.list(mode, status).await?)
    }

    /// Number of runs with a live RunContext.
    pub fn active_count(&self) -> usize {
        self.contexts.len()
    }
}

struct AssembledContext {
    clock: Arc<dyn Clock>,
    runner: StrategyRunner,
    engine: Option<BacktestEngine>,
    bridge: Option<LiveBridge>,
    probe_adapter: Option<Arc<dyn ExchangeAdapter>>,
}

struct LoopContext {
    run_id: Uuid,
    store: Arc<dyn RunStore>,
    log: Arc<dyn EventLog>,
    adapters: Arc<AdapterRegistry>,
    registry: Arc<RunRegistry>,
    contexts: Arc<DashMap<Uuid, RunHandle>>,
    clock: Arc<dyn Clock>,
    runner: StrategyRunner,
    engine: Option<BacktestEngine>,
    bridge: Option<LiveBridge>,
    probe_adapter: Option<Arc<dyn ExchangeAdapter>>,
    error_rx: mpsc::UnboundedReceiver<String>,
}

/// One loop for every mode: drive the clock, watch the error channel,
/// finalize the persisted status, clean up. Runs detached from the caller.
async fn run_loop(mut ctx: LoopContext) {
    let outcome: Result<ClockOutcome, String> = async {
        // Exchange-backed runs probe connectivity first so a dead exchange
        // fails the run instead of leaving it silently idle.
        if let Some(adapter) = &ctx.probe_adapter {
            connect_with_retries(adapter.as_ref())
                .await
                .map_err(|e| format!("exchange connection failed: {e}"))?;
        }

        tokio::select! {
            result = ctx.clock.run() => result.map_err(|e| e.to_string()),
            Some(message) = ctx.error_rx.recv() => Err(message),
        }
    }
    .await;

    match &outcome {
        Ok(ClockOutcome::Completed) => {
            let stats = ctx.engine.as_ref().map(|engine| engine.stats());
            finalize(&ctx, RunStatus::Completed, None, stats).await;
        }
        // An explicit stop persists its own status in `stop`.
        Ok(ClockOutcome::Stopped) => {}
        Err(message) => {
            error!(run_id = %ctx.run_id, error = %message, "Run failed");
            finalize(&ctx, RunStatus::Error, Some(message.clone()), None).await;
        }
    }

    // Cleanup on every exit path.
    ctx.runner.cleanup();
    if let Some(engine) = &ctx.engine {
        engine.cleanup();
    }
    if let Some(bridge) = &ctx.bridge {
        bridge.cleanup();
    }
    ctx.adapters.deregister(ctx.run_id);
    ctx.registry.remove(ctx.run_id);
    ctx.contexts.remove(&ctx.run_id);
}

/// Persist a terminal status and emit the matching run event, unless the
/// run already reached a terminal state through another path.
async fn finalize(
    ctx: &LoopContext,
    status: RunStatus,
    error_message: Option<String>,
    stats: Option<RunStatsPayload>,
) {
    let mut run = match ctx.store.get(ctx.run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => {
            error!(run_id = %ctx.run_id, "Run vanished during finalization");
            return;
        }
        Err(e) => {
            error!(run_id = %ctx.run_id, error = %e, "Run finalization read failed");
            return;
        }
    };
    if run.status.is_terminal() {
        return;
    }

    run.error_message = error_message;
    if let Err(e) = run.transition(status) {
        error!(run_id = %ctx.run_id, error = %e, "Run finalization transition failed");
        return;
    }
    if let Err(e) = ctx.store.update(&run).await {
        error!(run_id = %ctx.run_id, error = %e, "Run finalization write failed");
        return;
    }

    let event_type = match status {
        RunStatus::Completed => event_types::RUN_COMPLETED,
        RunStatus::Error => event_types::RUN_ERROR,
        RunStatus::Stopped => event_types::RUN_STOPPED,
        _ => return,
    };
    if let Err(e) = emit_run_event(&ctx.log, event_type, &run, stats).await {
        error!(run_id = %ctx.run_id, error = %e, "Run event emission failed");
    }
    info!(run_id = %ctx.run_id, status = %run.status, "Run finalized");
}

async fn emit_run_event(
    log: &Arc<dyn EventLog>,
    event_type: &str,
    run: &Run,
    stats: Option<RunStatsPayload>,
) -> Result<(), RunError> {
    let mut payload = RunEventPayload::from_run(run);
    if let Some(stats) = stats {
        payload = payload.with_stats(stats);
    }
    let envelope = Envelope::new(
        event_type,
        PRODUCER,
        serde_json::to_value(&payload).map_err(|e| RunError::EventLog(e.to_string()))?,
    )
    .with_run(run.id);
    log.append(envelope).await?;
    Ok(())
}

async fn connect_with_retries(adapter: &dyn ExchangeAdapter) -> Result<(), AdapterError> {
    let mut backoff = CONNECT_BACKOFF;
    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match adapter.connect().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, "Exchange connect failed; backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| AdapterError::Connection("retries exhausted".to_string())))
}
