//! Weaver - automated trading control plane
//!
//! Runs multiple trading strategies concurrently from one process: some
//! against live or paper exchanges, some as historical backtests. Every
//! component communicates through one durable, ordered event log.
//!
//! ```text
//! ┌───────┐ tick ┌──────────┐ strategy.* ┌────────┐ backtest.*/live.* ┌─────────────┐
//! │ Clock │─────▶│ Strategy │───────────▶│ Domain │──────────────────▶│ Engine /    │
//! │       │      │ Runner   │            │ Router │                   │ Live Bridge │
//! └───────┘      └──────────┘            └────────┘                   └──────┬──────┘
//!                      ▲                                                    │
//!                      │ data.WindowReady / orders.*                        ▼
//!                ┌─────┴────────────────────────────────────────────┐ ┌───────────┐
//!                │                 Event Log (outbox)               │ │   Order   │
//!                └──────────────────────┬───────────────────────────┘ │  Manager  │
//!                                       ▼                             └───────────┘
//!                                SSE Broadcaster
//! ```
//!
//! # Modules
//!
//! - [`events`] - envelopes, payload types, emission registry
//! - [`event_log`] - durable/in-memory log, offsets, consumers
//! - [`clock`] - bar timeframes, realtime and backtest clocks
//! - [`orders`] - order lifecycle state machine and manager
//! - [`adapter`] - exchange adapters (Alpaca, simulator, mock)
//! - [`backtest`] - per-run engine, fill simulation, positions, stats
//! - [`strategy`] - strategy trait, plugin loader, runner
//! - [`plugins`] - side-effect-free plugin discovery shared by the loaders
//! - [`router`] - strategy.* to live.*/backtest.* translation
//! - [`runs`] - run lifecycle orchestration
//! - [`sse`] - log-to-transport broadcasting
//! - [`persistence`] - PostgreSQL and in-memory stores
//! - [`system`] - component assembly

pub mod adapter;
pub mod backtest;
pub mod clock;
pub mod config;
pub mod event_log;
pub mod events;
pub mod health;
pub mod logging;
pub mod market;
pub mod orders;
pub mod persistence;
pub mod plugins;
pub mod router;
pub mod runs;
pub mod sse;
pub mod strategy;
pub mod system;

// Convenient re-exports at crate root
pub use clock::Timeframe;
pub use config::AppConfig;
pub use event_log::{EventLog, MemoryEventLog, PgEventLog};
pub use events::{Envelope, Seq};
pub use market::Bar;
pub use orders::{OrderIntent, OrderManager, OrderState, OrderStatus};
pub use runs::{Run, RunManager, RunMode, RunSpec, RunStatus};
pub use system::Weaver;
