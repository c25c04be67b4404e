//! In-process subscriber registry
//!
//! Shared by both log implementations so dispatch order, type matching and
//! filtering cannot diverge between them. Registration and unregistration
//! during a dispatch are safe: dispatch runs against a snapshot taken under
//! the lock, callbacks run outside it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::warn;
use uuid::Uuid;

use crate::events::{Envelope, Seq};

/// An envelope together with the sequence number the log assigned it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: Seq,
    pub envelope: Envelope,
}

pub type SubscriberFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Subscriber callback. Invoked synchronously during `append`; long-running
/// work belongs on a spawned task, not in the callback body.
pub type SubscriberCallback = Arc<dyn Fn(Delivery) -> SubscriberFuture + Send + Sync>;

/// Optional per-envelope predicate applied after type matching.
pub type EventFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Filter that accepts only envelopes scoped to `run_id`.
pub fn run_filter(run_id: Uuid) -> EventFilter {
    Arc::new(move |env: &Envelope| env.run_id == Some(run_id))
}

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: u64,
    name: String,
    types: Vec<String>,
    wildcard: bool,
    filter: Option<EventFilter>,
    callback: SubscriberCallback,
}

impl Subscription {
    fn matches_type(&self, event_type: &str) -> bool {
        self.wildcard || self.types.iter().any(|t| t == event_type)
    }
}

/// Registration-ordered subscriber set.
#[derive(Default)]
pub struct SubscriberSet {
    subs: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        name: &str,
        types: &[&str],
        filter: Option<EventFilter>,
        callback: SubscriberCallback,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let wildcard = types.iter().any(|t| *t == "*");
        let sub = Subscription {
            id,
            name: name.to_string(),
            types: types.iter().map(|t| t.to_string()).collect(),
            wildcard,
            filter,
            callback,
        };
        self.subs.lock().expect("subscriber set lock").push(sub);
        SubscriptionId(id)
    }

    /// Idempotent: unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subs
            .lock()
            .expect("subscriber set lock")
            .retain(|s| s.id != id.0);
    }

    pub fn len(&self) -> usize {
        self.subs.lock().expect("subscriber set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every matching subscriber, in registration order, awaiting each
    /// callback in turn. A failing callback is logged and skipped.
    pub async fn dispatch(&self, delivery: &Delivery) {
        // Snapshot under the lock; run callbacks outside it so a callback may
        // subscribe, unsubscribe, or append re-entrantly.
        let matching: Vec<(String, Option<EventFilter>, SubscriberCallback)> = {
            let subs = self.subs.lock().expect("subscriber set lock");
            subs.iter()
                .filter(|s| s.matches_type(&delivery.envelope.event_type))
                .map(|s| (s.name.clone(), s.filter.clone(), s.callback.clone()))
                .collect()
        };

        for (name, filter, callback) in matching {
            if let Some(filter) = &filter {
                if !filter(&delivery.envelope) {
                    continue;
                }
            }
            if let Err(e) = (callback)(delivery.clone()).await {
                warn!(
                    subscriber = %name,
                    envelope_id = %delivery.envelope.id,
                    event_type = %delivery.envelope.event_type,
                    error = %e,
                    "Subscriber callback failed; continuing with remaining subscribers"
                );
            }
        }
    }
}
