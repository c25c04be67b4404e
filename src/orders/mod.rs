//! Order lifecycle - idempotent state machine over a pluggable exchange
//!
//! The [`OrderManager`] owns every OrderState transition. Submission is
//! idempotent by client order id, transitions follow the legal edges in
//! [`OrderStatus`], fills are append-only and survive restart alongside the
//! order row.

pub mod error;
pub mod manager;
pub mod poller;
pub mod state;
pub mod types;

pub use error::OrderError;
pub use manager::{OrderManager, OrderManagerConfig};
pub use poller::{FillPoller, PollerConfig};
pub use state::OrderStatus;
pub use types::{Fill, Liquidity, OrderIntent, OrderState, OrderType, Side, TimeInForce};
