//! Event model - envelopes, payload types, and the emission registry
//!
//! Every piece of information that moves through the control plane is an
//! [`Envelope`] carrying a namespaced `type` and a typed JSON payload.
//! The registry maps each known type string to its payload shape and is
//! consulted on emission, so a malformed payload never reaches the log.

pub mod envelope;
pub mod payloads;
pub mod registry;

pub use envelope::Envelope;
pub use payloads::{
    ClockTickPayload, DataWindowPayload, EventPayload, FetchWindowPayload, FillDetail,
    OrderEventPayload, RunEventPayload, RunStatsPayload, WindowChunkPayload,
};

/// Sequence number assigned by the event log. Total order across all runs.
pub type Seq = i64;

/// Event type strings. Namespaced, dotted, case-sensitive.
pub mod event_types {
    pub const RUN_CREATED: &str = "run.Created";
    pub const RUN_STARTED: &str = "run.Started";
    pub const RUN_STOPPED: &str = "run.Stopped";
    pub const RUN_COMPLETED: &str = "run.Completed";
    pub const RUN_ERROR: &str = "run.Error";

    pub const CLOCK_TICK: &str = "clock.Tick";

    pub const STRATEGY_FETCH_WINDOW: &str = "strategy.FetchWindow";
    pub const STRATEGY_PLACE_REQUEST: &str = "strategy.PlaceRequest";

    pub const LIVE_FETCH_WINDOW: &str = "live.FetchWindow";
    pub const LIVE_PLACE_ORDER: &str = "live.PlaceOrder";
    pub const BACKTEST_FETCH_WINDOW: &str = "backtest.FetchWindow";
    pub const BACKTEST_PLACE_ORDER: &str = "backtest.PlaceOrder";

    pub const DATA_WINDOW_READY: &str = "data.WindowReady";
    pub const DATA_WINDOW_CHUNK: &str = "data.WindowChunk";

    pub const ORDERS_CREATED: &str = "orders.Created";
    pub const ORDERS_SUBMITTED: &str = "orders.Submitted";
    pub const ORDERS_ACCEPTED: &str = "orders.Accepted";
    pub const ORDERS_PARTIALLY_FILLED: &str = "orders.PartiallyFilled";
    pub const ORDERS_FILLED: &str = "orders.Filled";
    pub const ORDERS_CANCELLED: &str = "orders.Cancelled";
    pub const ORDERS_REJECTED: &str = "orders.Rejected";
    pub const ORDERS_EXPIRED: &str = "orders.Expired";
}
