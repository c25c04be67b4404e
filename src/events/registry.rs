//! Event type registry
//!
//! Maps every known event type string to a payload descriptor and validates
//! payload shape on emission. The set of types is closed: appending an
//! envelope with an unknown type is an error, which keeps typos out of the
//! log.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::event_types as t;
use super::payloads::{
    ClockTickPayload, DataWindowPayload, FetchWindowPayload, OrderEventPayload, RunEventPayload,
    WindowChunkPayload,
};
use crate::orders::OrderIntent;

/// Why an envelope was refused at emission.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("payload shape mismatch for {event_type}: {detail}")]
    PayloadShape { event_type: String, detail: String },
}

type Validator = fn(&Value) -> Result<(), String>;

fn shape_of<P: DeserializeOwned>(value: &Value) -> Result<(), String> {
    serde_json::from_value::<P>(value.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

static REGISTRY: Lazy<HashMap<&'static str, Validator>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Validator> = HashMap::new();

    m.insert(t::RUN_CREATED, shape_of::<RunEventPayload>);
    m.insert(t::RUN_STARTED, shape_of::<RunEventPayload>);
    m.insert(t::RUN_STOPPED, shape_of::<RunEventPayload>);
    m.insert(t::RUN_COMPLETED, shape_of::<RunEventPayload>);
    m.insert(t::RUN_ERROR, shape_of::<RunEventPayload>);

    m.insert(t::CLOCK_TICK, shape_of::<ClockTickPayload>);

    m.insert(t::STRATEGY_FETCH_WINDOW, shape_of::<FetchWindowPayload>);
    m.insert(t::LIVE_FETCH_WINDOW, shape_of::<FetchWindowPayload>);
    m.insert(t::BACKTEST_FETCH_WINDOW, shape_of::<FetchWindowPayload>);

    m.insert(t::STRATEGY_PLACE_REQUEST, shape_of::<OrderIntent>);
    m.insert(t::LIVE_PLACE_ORDER, shape_of::<OrderIntent>);
    m.insert(t::BACKTEST_PLACE_ORDER, shape_of::<OrderIntent>);

    m.insert(t::DATA_WINDOW_READY, shape_of::<DataWindowPayload>);
    m.insert(t::DATA_WINDOW_CHUNK, shape_of::<WindowChunkPayload>);

    m.insert(t::ORDERS_CREATED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_SUBMITTED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_ACCEPTED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_PARTIALLY_FILLED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_FILLED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_CANCELLED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_REJECTED, shape_of::<OrderEventPayload>);
    m.insert(t::ORDERS_EXPIRED, shape_of::<OrderEventPayload>);

    m
});

/// Validate an envelope payload against its declared type.
pub fn validate(event_type: &str, payload: &Value) -> Result<(), RegistryError> {
    let validator = REGISTRY
        .get(event_type)
        .ok_or_else(|| RegistryError::UnknownType(event_type.to_string()))?;
    validator(payload).map_err(|detail| RegistryError::PayloadShape {
        event_type: event_type.to_string(),
        detail,
    })
}

/// All registered event types.
pub fn known_types() -> Vec<&'static str> {
    let mut types: Vec<_> = REGISTRY.keys().copied().collect();
    types.sort_unstable();
    types
}
