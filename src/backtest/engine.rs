//! Per-run backtest engine
//!
//! Serves historical windows out of a preloaded bar cache and executes
//! orders through an embedded simulated exchange. The engine advances its
//! cursor on `clock.Tick`, so its tick subscription must be registered
//! before the strategy runner's; the run manager wires components in that
//! order.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::fill::{FillPolicy, FillSimulator, SimOutcome};
use super::position::PositionTracker;
use super::stats::{compute, StatsInputs};
use crate::adapter::{
    AccountSnapshot, AdapterError, ExchangeAdapter, MarketClock, MarketDay, MarketStream,
    OrderAck, OrderSnapshot, PositionSnapshot,
};
use crate::clock::Timeframe;
use crate::event_log::{run_filter, EventLog, SubscriptionId};
use crate::events::{
    event_types, ClockTickPayload, DataWindowPayload, FetchWindowPayload, RunStatsPayload,
};
use crate::market::Bar;
use crate::orders::{Fill, Liquidity, OrderIntent, OrderManager, OrderStatus};
use crate::persistence::BarStore;
use crate::runs::{Run, RunError};

const PRODUCER: &str = "backtest_engine";

#[derive(Debug, Clone)]
pub struct BacktestEngineConfig {
    pub fill_policy: FillPolicy,
    pub initial_capital: Decimal,
    /// Bars preloaded before `start_time` so early lookbacks are served.
    pub preload_margin_bars: u32,
}

impl Default for BacktestEngineConfig {
    fn default() -> Self {
        Self {
            fill_policy: FillPolicy::default(),
            initial_capital: Decimal::new(100_000, 0),
            preload_margin_bars: 500,
        }
    }
}

/// State shared between the engine and its simulated exchange.
#[derive(Debug)]
struct EngineCore {
    run_id: Uuid,
    timeframe: Timeframe,
    simulator: FillSimulator,
    initial_capital: Decimal,
    bars: RwLock<FxHashMap<String, Vec<Bar>>>,
    /// Simulation position: the most recent tick boundary, unix seconds.
    cursor_secs: AtomicI64,
    positions: Mutex<PositionTracker>,
}

impl EngineCore {
    fn cursor(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.cursor_secs.load(Ordering::SeqCst), 0)
            .single()
            .expect("cursor unix second is valid")
    }

    fn set_cursor(&self, ts: DateTime<Utc>) {
        self.cursor_secs.store(ts.timestamp(), Ordering::SeqCst);
    }

    /// The bar starting exactly at `ts`.
    fn boundary_bar(&self, symbol: &str, ts: DateTime<Utc>) -> Option<Bar> {
        let bars = self.bars.read().expect("bar cache lock");
        let series = bars.get(symbol)?;
        series
            .binary_search_by_key(&ts, |b| b.ts)
            .ok()
            .map(|i| series[i].clone())
    }

    /// The most recent bar at or before `ts`.
    fn last_bar(&self, symbol: &str, ts: DateTime<Utc>) -> Option<Bar> {
        let bars = self.bars.read().expect("bar cache lock");
        let series = bars.get(symbol)?;
        let idx = match series.binary_search_by_key(&ts, |b| b.ts) {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        Some(series[idx].clone())
    }

    /// The last `lookback` completed bars ending at `end_ts`, ascending.
    ///
    /// A bar starting exactly at `end_ts` is still in progress at that
    /// instant and is excluded; the strategy never sees ahead of the clock.
    fn window(&self, symbol: &str, end_ts: DateTime<Utc>, lookback: u32) -> Vec<Bar> {
        let bars = self.bars.read().expect("bar cache lock");
        let Some(series) = bars.get(symbol) else {
            return Vec::new();
        };
        let end_idx = match series.binary_search_by_key(&end_ts, |b| b.ts) {
            Ok(i) => i,
            Err(i) => i,
        };
        let start_idx = end_idx.saturating_sub(lookback as usize);
        series[start_idx..end_idx].to_vec()
    }

    fn mark_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_bar(symbol, self.cursor()).map(|b| b.close)
    }
}

/// In-process exchange backed by the engine's bar cache.
///
/// Fills are priced by the [`FillSimulator`] at the current cursor and
/// reported directly in the submit ack. Fill ids are deterministic within a
/// run so re-running identical inputs yields identical results.
#[derive(Debug)]
pub struct SimulatedExchange {
    core: Arc<EngineCore>,
}

#[async_trait]
impl ExchangeAdapter for SimulatedExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn submit(&self, intent: &OrderIntent) -> Result<OrderAck, AdapterError> {
        let cursor = self.core.cursor();
        let boundary = self.core.boundary_bar(&intent.symbol, cursor);
        let last = self.core.last_bar(&intent.symbol, cursor);

        match self.core.simulator.simulate(intent, boundary.as_ref(), last.as_ref()) {
            SimOutcome::Rejected(reason) => Err(AdapterError::Rejected(reason)),
            SimOutcome::Filled(sim) => {
                let realized = self.core.positions.lock().expect("position lock").apply_fill(
                    &intent.symbol,
                    intent.side,
                    sim.quantity,
                    sim.price,
                    sim.fee,
                );
                debug!(
                    run_id = %self.core.run_id,
                    symbol = %intent.symbol,
                    price = %sim.price,
                    realized = %realized,
                    "Simulated fill"
                );

                let mut fill = Fill::new(Uuid::nil(), sim.quantity, sim.price, sim.fee, cursor)
                    .with_liquidity(Liquidity::Taker);
                fill.fill_id =
                    format!("sim-{}-{}", self.core.run_id, intent.client_order_id);

                Ok(OrderAck {
                    exchange_order_id: format!("sim-{}", intent.client_order_id),
                    status: OrderStatus::Submitted,
                    fills: vec![fill],
                })
            }
        }
    }

    async fn cancel(&self, _exchange_order_id: &str) -> Result<(), AdapterError> {
        // Simulated orders fill synchronously; nothing is ever resting.
        Ok(())
    }

    async fn get_order(&self, exchange_order_id: &str) -> Result<OrderSnapshot, AdapterError> {
        Err(AdapterError::NotFound(exchange_order_id.to_string()))
    }

    async fn get_bars(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AdapterError> {
        let bars = self.core.bars.read().expect("bar cache lock");
        Ok(bars
            .get(symbol)
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.ts >= start && b.ts <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, AdapterError> {
        let positions = self.core.positions.lock().expect("position lock");
        let realized = positions.total_realized_pnl() - positions.fees_paid();
        let unrealized = positions.total_unrealized_pnl(|s| self.core.mark_price(s));
        let cash = self.core.initial_capital + realized;
        Ok(AccountSnapshot {
            account_id: format!("sim-{}", self.core.run_id),
            currency: "USD".to_string(),
            cash,
            equity: cash + unrealized,
            buying_power: cash,
        })
    }

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, AdapterError> {
        let positions = self.core.positions.lock().expect("position lock");
        Ok(positions
            .positions()
            .filter(|p| !p.quantity.is_zero())
            .map(|p| PositionSnapshot {
                symbol: p.symbol.clone(),
                quantity: p.quantity,
                avg_entry_price: p.avg_entry_price,
                unrealized_pnl: self
                    .core
                    .mark_price(&p.symbol)
                    .map(|m| p.unrealized_pnl(m))
                    .unwrap_or(Decimal::ZERO),
            })
            .collect())
    }

    async fn stream_trades(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn stream_quotes(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn stream_bars(&self, _symbols: &[String]) -> Result<MarketStream, AdapterError> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(rx)
    }

    async fn get_clock(&self) -> Result<MarketClock, AdapterError> {
        let now = self.core.cursor();
        Ok(MarketClock {
            ts: now,
            is_open: true,
            next_open: now,
            next_close: now,
        })
    }

    async fn get_calendar(
        &self,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<MarketDay>, AdapterError> {
        Ok(Vec::new())
    }
}

pub struct BacktestEngine {
    core: Arc<EngineCore>,
    adapter: Arc<SimulatedExchange>,
    log: Arc<dyn EventLog>,
    order_manager: Arc<OrderManager>,
    bar_store: Arc<dyn BarStore>,
    symbols: Vec<String>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    preload_margin_bars: u32,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl BacktestEngine {
    /// Build an engine for one backtest run. The run spec was validated at
    /// creation, so both time bounds are present.
    pub fn new(
        run: &Run,
        config: BacktestEngineConfig,
        bar_store: Arc<dyn BarStore>,
        log: Arc<dyn EventLog>,
        order_manager: Arc<OrderManager>,
    ) -> Result<Self, RunError> {
        let (start, end) = match (run.start_time, run.end_time) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(RunError::Validation(
                    "backtest engine requires run time bounds".to_string(),
                ))
            }
        };

        let core = Arc::new(EngineCore {
            run_id: run.id,
            timeframe: run.timeframe,
            simulator: FillSimulator::new(config.fill_policy),
            initial_capital: config.initial_capital,
            bars: RwLock::new(FxHashMap::default()),
            cursor_secs: AtomicI64::new(start.timestamp()),
            positions: Mutex::new(PositionTracker::new()),
        });

        Ok(Self {
            adapter: Arc::new(SimulatedExchange { core: core.clone() }),
            core,
            log,
            order_manager,
            bar_store,
            symbols: run.symbols.clone(),
            start,
            end,
            preload_margin_bars: config.preload_margin_bars,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// The exchange adapter this run's orders execute against.
    pub fn sim_adapter(&self) -> Arc<dyn ExchangeAdapter> {
        self.adapter.clone()
    }

    /// Preload the bar cache and attach event subscriptions.
    pub async fn initialize(&self) -> Result<(), RunError> {
        let margin_secs =
            self.core.timeframe.duration_secs() * self.preload_margin_bars as i64;
        let preload_start = self.start - chrono::Duration::seconds(margin_secs);

        for symbol in &self.symbols {
            let bars = self
                .bar_store
                .range(symbol, self.core.timeframe, preload_start, self.end)
                .await?;
            if bars.is_empty() {
                return Err(RunError::NoData {
                    symbol: symbol.clone(),
                    timeframe: self.core.timeframe.to_string(),
                });
            }
            info!(
                run_id = %self.core.run_id,
                symbol = %symbol,
                bars = bars.len(),
                "Bar cache loaded"
            );
            self.core
                .bars
                .write()
                .expect("bar cache lock")
                .insert(symbol.clone(), bars);
        }

        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");

        // Cursor advance. Registered before the strategy runner subscribes,
        // so order placement during a tick sees the tick's boundary.
        let core = self.core.clone();
        subscriptions.push(self.log.subscribe(
            "backtest_engine.tick",
            &[event_types::CLOCK_TICK],
            Some(run_filter(self.core.run_id)),
            Arc::new(move |delivery| {
                let core = core.clone();
                Box::pin(async move {
                    let payload: ClockTickPayload = delivery.envelope.payload_as()?;
                    core.set_cursor(payload.ts);
                    Ok(())
                })
            }),
        ));

        // Window requests.
        let core = self.core.clone();
        let log = self.log.clone();
        subscriptions.push(self.log.subscribe(
            "backtest_engine.fetch_window",
            &[event_types::BACKTEST_FETCH_WINDOW],
            Some(run_filter(self.core.run_id)),
            Arc::new(move |delivery| {
                let core = core.clone();
                let log = log.clone();
                Box::pin(async move {
                    let request: FetchWindowPayload = delivery.envelope.payload_as()?;
                    let end_ts = request.end_ts.unwrap_or_else(|| core.cursor());
                    let bars = core.window(&request.symbol, end_ts, request.lookback);
                    let payload = DataWindowPayload {
                        symbol: request.symbol,
                        end_ts,
                        bars,
                    };
                    let envelope = delivery
                        .envelope
                        .caused_by(PRODUCER, &payload);
                    log.append(envelope).await?;
                    Ok(())
                })
            }),
        ));

        // Order execution.
        let order_manager = self.order_manager.clone();
        subscriptions.push(self.log.subscribe(
            "backtest_engine.place_order",
            &[event_types::BACKTEST_PLACE_ORDER],
            Some(run_filter(self.core.run_id)),
            Arc::new(move |delivery| {
                let order_manager = order_manager.clone();
                Box::pin(async move {
                    let intent: OrderIntent = delivery.envelope.payload_as()?;
                    order_manager.submit(&intent, Some(&delivery.envelope)).await?;
                    Ok(())
                })
            }),
        ));

        Ok(())
    }

    /// Aggregate statistics for `run.Completed`.
    pub fn stats(&self) -> RunStatsPayload {
        let positions = self.core.positions.lock().expect("position lock");
        compute(&StatsInputs {
            initial_capital: self.core.initial_capital,
            closed_trades: positions.closed_trades().to_vec(),
            total_realized_pnl: positions.total_realized_pnl(),
            total_unrealized_pnl: positions.total_unrealized_pnl(|s| self.core.mark_price(s)),
            fees_paid: positions.fees_paid(),
            start: self.start,
            end: self.end,
        })
    }

    /// Remove subscriptions and release the bar cache.
    pub fn cleanup(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");
        for id in subscriptions.drain(..) {
            self.log.unsubscribe(id);
        }
        self.core.bars.write().expect("bar cache lock").clear();
        debug!(run_id = %self.core.run_id, "Backtest engine cleaned up");
    }
}

impl Drop for BacktestEngine {
    fn drop(&mut self) {
        // Subscriptions must not outlive the engine.
        let subscriptions: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .map(|mut s| s.drain(..).collect())
            .unwrap_or_default();
        for id in subscriptions {
            self.log.unsubscribe(id);
        }
    }
}
