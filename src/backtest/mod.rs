//! Backtesting - historical windows and deterministic simulated execution
//!
//! One [`BacktestEngine`] per backtest run. The engine owns the bar cache,
//! the fill simulator, and the run's position tracker; its embedded
//! [`SimulatedExchange`] plugs into the order manager like any other
//! exchange adapter.

pub mod engine;
pub mod fill;
pub mod position;
pub mod stats;

pub use engine::{BacktestEngine, BacktestEngineConfig, SimulatedExchange};
pub use fill::{CommissionModel, FillPolicy, FillSimulator, SimOutcome, SimulatedFill, SlippageModel};
pub use position::{Position, PositionTracker};
pub use stats::{compute as compute_stats, StatsInputs};
