//! The universal event wrapper
//!
//! Envelopes are immutable after emission. Identity fields form the
//! causation chain: `corr_id` groups every envelope serving one logical
//! request, `causation_id` points at the envelope that directly produced
//! this one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payloads::EventPayload;

/// Envelope id. ULID-based: sortable, unique, no coordination needed.
fn new_event_id() -> String {
    ulid::Ulid::new().to_string()
}

/// The universal event wrapper carried by the log.
///
/// `payload` is a JSON value whose shape is fixed per `event_type`; the
/// registry in [`super::registry`] verifies it on emission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique per event.
    pub id: String,
    /// Namespaced dotted type string, case-sensitive (e.g. `orders.Filled`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload schema version.
    pub version: u32,
    /// Present for all run-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Groups events that serve one logical request.
    pub corr_id: String,
    /// The event that directly caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Emission time, UTC.
    pub ts: DateTime<Utc>,
    /// Originating component name.
    pub producer: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Type-specific structured payload.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create a root envelope: fresh id, `corr_id` = own id, no causation.
    pub fn new(event_type: &str, producer: &str, payload: serde_json::Value) -> Self {
        let id = new_event_id();
        Self {
            id: id.clone(),
            event_type: event_type.to_string(),
            version: 1,
            run_id: None,
            corr_id: id,
            causation_id: None,
            trace_id: None,
            ts: Utc::now(),
            producer: producer.to_string(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// Create a root envelope from a typed payload.
    pub fn of<P: EventPayload>(producer: &str, payload: &P) -> Self {
        Self::new(
            P::EVENT_TYPE,
            producer,
            serde_json::to_value(payload).expect("payload serialization is infallible"),
        )
    }

    /// Derive a caused envelope: same `corr_id`, `causation_id` = this
    /// envelope's id, fresh id and timestamp. `run_id` is inherited.
    pub fn caused(&self, event_type: &str, producer: &str, payload: serde_json::Value) -> Self {
        Self {
            id: new_event_id(),
            event_type: event_type.to_string(),
            version: 1,
            run_id: self.run_id,
            corr_id: self.corr_id.clone(),
            causation_id: Some(self.id.clone()),
            trace_id: self.trace_id.clone(),
            ts: Utc::now(),
            producer: producer.to_string(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// Derive a caused envelope from a typed payload.
    pub fn caused_by<P: EventPayload>(&self, producer: &str, payload: &P) -> Self {
        self.caused(
            P::EVENT_TYPE,
            producer,
            serde_json::to_value(payload).expect("payload serialization is infallible"),
        )
    }

    /// Attach a run id. Consumes and returns self so construction chains.
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_trace(mut self, trace_id: &str) -> Self {
        self.trace_id = Some(trace_id.to_string());
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Deserialize the payload into its typed form.
    pub fn payload_as<P: serde::de::DeserializeOwned>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_types;

    #[test]
    fn test_root_envelope_identity() {
        let env = Envelope::new(event_types::CLOCK_TICK, "clock", serde_json::json!({}));
        assert_eq!(env.corr_id, env.id);
        assert!(env.causation_id.is_none());
        assert_eq!(env.version, 1);
        assert_eq!(env.producer, "clock");
    }

    #[test]
    fn test_caused_envelope_links_to_parent() {
        let run_id = Uuid::new_v4();
        let parent = Envelope::new(event_types::CLOCK_TICK, "clock", serde_json::json!({}))
            .with_run(run_id);
        let child = parent.caused(
            event_types::STRATEGY_PLACE_REQUEST,
            "strategy_runner",
            serde_json::json!({}),
        );

        assert_ne!(child.id, parent.id);
        assert_eq!(child.corr_id, parent.corr_id);
        assert_eq!(child.causation_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.run_id, Some(run_id));
    }

    #[test]
    fn test_envelope_ids_are_sortable_and_unique() {
        let a = Envelope::new("run.Created", "test", serde_json::json!({}));
        let b = Envelope::new("run.Created", "test", serde_json::json!({}));
        assert_ne!(a.id, b.id);
        // The leading characters encode the timestamp, so ids sort by time.
        assert!(b.id[..10] >= a.id[..10]);
    }

    #[test]
    fn test_wire_shape_roundtrip() {
        let env = Envelope::new(event_types::RUN_CREATED, "run_manager", serde_json::json!({"x": 1}))
            .with_run(Uuid::new_v4())
            .with_header("source", "api");

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"run.Created""#));

        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }
}
