//! Domain router - the single point of mode-specific dispatch
//!
//! A stateless singleton wired at process startup. It rewrites abstract
//! `strategy.*` intents into concrete `live.*` / `backtest.*` commands
//! based on the run's mode, so strategies and engines never know about
//! each other's modes. The translated envelope preserves `corr_id` and is
//! caused by the source event.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::event_log::{EventLog, SubscriptionId};
use crate::events::event_types;
use crate::runs::{RunMode, RunRegistry};

const PRODUCER: &str = "domain_router";

pub struct DomainRouter {
    log: Arc<dyn EventLog>,
    registry: Arc<RunRegistry>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl DomainRouter {
    pub fn new(log: Arc<dyn EventLog>, registry: Arc<RunRegistry>) -> Self {
        Self {
            log,
            registry,
            subscription: Mutex::new(None),
        }
    }

    /// Attach the router to the log. Call once at startup.
    pub fn start(&self) {
        let log = self.log.clone();
        let registry = self.registry.clone();

        let id = self.log.subscribe(
            "domain_router",
            &[
                event_types::STRATEGY_FETCH_WINDOW,
                event_types::STRATEGY_PLACE_REQUEST,
            ],
            None,
            Arc::new(move |delivery| {
                let log = log.clone();
                let registry = registry.clone();
                Box::pin(async move {
                    let envelope = &delivery.envelope;
                    let Some(run_id) = envelope.run_id else {
                        warn!(
                            envelope_id = %envelope.id,
                            event_type = %envelope.event_type,
                            "Strategy event without run_id dropped"
                        );
                        return Ok(());
                    };
                    let Some(mode) = registry.mode_of(run_id) else {
                        warn!(
                            envelope_id = %envelope.id,
                            run_id = %run_id,
                            "Strategy event for unknown run dropped"
                        );
                        return Ok(());
                    };

                    let target = translate(&envelope.event_type, mode);
                    let translated =
                        envelope.caused(target, PRODUCER, envelope.payload.clone());
                    debug!(
                        run_id = %run_id,
                        source = %envelope.event_type,
                        target = %target,
                        "Routed strategy event"
                    );
                    log.append(translated).await?;
                    Ok(())
                })
            }),
        );
        *self.subscription.lock().expect("subscription lock") = Some(id);
    }

    pub fn stop(&self) {
        if let Some(id) = self.subscription.lock().expect("subscription lock").take() {
            self.log.unsubscribe(id);
        }
    }
}

/// Map an abstract strategy event type to its mode-specific command.
fn translate(event_type: &str, mode: RunMode) -> &'static str {
    let backtest = mode == RunMode::Backtest;
    match event_type {
        event_types::STRATEGY_FETCH_WINDOW => {
            if backtest {
                event_types::BACKTEST_FETCH_WINDOW
            } else {
                event_types::LIVE_FETCH_WINDOW
            }
        }
        event_types::STRATEGY_PLACE_REQUEST => {
            if backtest {
                event_types::BACKTEST_PLACE_ORDER
            } else {
                event_types::LIVE_PLACE_ORDER
            }
        }
        // The subscription is limited to the two types above.
        other => unreachable!("router received unexpected type {other}"),
    }
}
