//! Order lifecycle manager
//!
//! The single entry point for placing, cancelling and filling orders.
//! Submission is idempotent by (run_id, client_order_id): a duplicate
//! returns the existing state with no adapter call and no new event.
//! Mutations are serialized per order id, so at most one transition is in
//! flight for any order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::OrderError;
use super::state::OrderStatus;
use super::types::{Fill, Liquidity, OrderIntent, OrderState, TimeInForce};
use crate::adapter::{AdapterError, AdapterRegistry, OrderAck};
use crate::event_log::EventLog;
use crate::events::{event_types, Envelope, OrderEventPayload};
use crate::persistence::OrderStore;

const PRODUCER: &str = "order_manager";

#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Applied when an intent omits time_in_force.
    pub default_time_in_force: TimeInForce,
    /// Adapter attempts for transient failures.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt with jitter.
    pub initial_backoff: Duration,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            default_time_in_force: TimeInForce::Day,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

pub struct OrderManager {
    store: Arc<dyn OrderStore>,
    log: Arc<dyn EventLog>,
    adapters: Arc<AdapterRegistry>,
    config: OrderManagerConfig,
    /// Per-order mutation guards. One in-flight mutation per order id.
    guards: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
}

impl OrderManager {
    pub fn new(
        store: Arc<dyn OrderStore>,
        log: Arc<dyn EventLog>,
        adapters: Arc<AdapterRegistry>,
        config: OrderManagerConfig,
    ) -> Self {
        Self {
            store,
            log,
            adapters,
            config,
            guards: DashMap::new(),
        }
    }

    fn guard(&self, order_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.guards
            .entry(order_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn emit(
        &self,
        event_type: &str,
        order: &OrderState,
        fill: Option<&Fill>,
        cause: Option<&Envelope>,
    ) -> Result<(), OrderError> {
        let mut payload = OrderEventPayload::from_order(order);
        if let Some(fill) = fill {
            payload = payload.with_fill(fill);
        }
        let value = serde_json::to_value(&payload)
            .map_err(|e| OrderError::EventLog(e.to_string()))?;
        let envelope = match cause {
            Some(cause) => cause.caused(event_type, PRODUCER, value),
            None => Envelope::new(event_type, PRODUCER, value).with_run(order.run_id),
        };
        self.log.append(envelope).await?;
        Ok(())
    }

    /// Place an order. Idempotent: a known (run_id, client_order_id) returns
    /// the existing state without touching the adapter or the log.
    ///
    /// `cause` is the envelope that carried the intent, when the submission
    /// came off the event stream; emitted order events chain off it.
    pub async fn submit(
        &self,
        intent: &OrderIntent,
        cause: Option<&Envelope>,
    ) -> Result<OrderState, OrderError> {
        intent.validate()?;

        // Idempotency check. A record stuck in SUBMITTING without an
        // exchange id is a previous attempt that failed transiently; resume
        // it instead of returning it.
        let mut order = match self
            .store
            .find_by_client_id(intent.run_id, &intent.client_order_id)
            .await?
        {
            Some(existing)
                if existing.exchange_order_id.is_some()
                    || existing.status != OrderStatus::Submitting =>
            {
                debug!(
                    order_id = %existing.id,
                    client_order_id = %intent.client_order_id,
                    "Duplicate client_order_id; returning existing order"
                );
                return Ok(existing);
            }
            Some(resumable) => {
                info!(
                    order_id = %resumable.id,
                    client_order_id = %intent.client_order_id,
                    "Resuming interrupted submission"
                );
                resumable
            }
            None => {
                let order = OrderState::from_intent(intent, self.config.default_time_in_force);
                self.store.insert(&order).await?;
                self.emit(event_types::ORDERS_CREATED, &order, None, cause).await?;
                order
            }
        };

        let adapter = self
            .adapters
            .get(intent.run_id)
            .ok_or(OrderError::NoAdapter(intent.run_id))?;

        let mut wire_intent = intent.clone();
        wire_intent
            .time_in_force
            .get_or_insert(self.config.default_time_in_force);

        let ack = match self.submit_with_retries(&wire_intent, adapter.as_ref()).await {
            Ok(ack) => ack,
            Err(AdapterError::Rejected(reason)) => {
                let guard = self.guard(order.id);
                let _g = guard.lock().await;
                order.reject_reason = Some(reason);
                order.transition(OrderStatus::Rejected)?;
                self.store.update(&order).await?;
                self.emit(event_types::ORDERS_REJECTED, &order, None, cause).await?;
                return Ok(order);
            }
            Err(e) => {
                // Transient after retries, or an operational failure. The
                // order stays SUBMITTING; retrying the same client_order_id
                // resumes it. No terminal event is emitted.
                warn!(order_id = %order.id, error = %e, "Adapter submit failed");
                return Err(OrderError::AdapterUnavailable(e.to_string()));
            }
        };

        let ack_fills;
        {
            let guard = self.guard(order.id);
            let _g = guard.lock().await;
            order.exchange_order_id = Some(ack.exchange_order_id.clone());
            order.transition(OrderStatus::Submitted)?;
            self.store.update(&order).await?;
            self.emit(event_types::ORDERS_SUBMITTED, &order, None, cause).await?;

            if ack.status == OrderStatus::Accepted {
                order.transition(OrderStatus::Accepted)?;
                self.store.update(&order).await?;
                self.emit(event_types::ORDERS_ACCEPTED, &order, None, cause).await?;
            }
            ack_fills = ack.fills;
        }

        // Simulated exchanges fill in the ack. Applied outside the guard
        // because record_fill takes it again.
        for mut fill in ack_fills {
            fill.order_id = order.id;
            if fill.liquidity.is_none() {
                fill.liquidity = Some(Liquidity::Taker);
            }
            order = self.record_fill(order.id, fill, cause).await?;
        }

        Ok(order)
    }

    async fn submit_with_retries(
        &self,
        intent: &OrderIntent,
        adapter: &dyn crate::adapter::ExchangeAdapter,
    ) -> Result<OrderAck, AdapterError> {
        let mut backoff = self.config.initial_backoff;
        let mut last_err = None;

        for attempt in 1..=self.config.max_attempts {
            match adapter.submit(intent).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Transient adapter error; backing off"
                    );
                    let jitter = rand::thread_rng().gen_range(0.75..1.25);
                    tokio::time::sleep(backoff.mul_f64(jitter)).await;
                    backoff *= 2;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| AdapterError::Connection("retries exhausted".to_string())))
    }

    /// Cancel an order. Idempotent on terminal orders: the current state is
    /// returned and no event is emitted.
    pub async fn cancel(
        &self,
        order_id: Uuid,
        cause: Option<&Envelope>,
    ) -> Result<OrderState, OrderError> {
        let guard = self.guard(order_id);
        let _g = guard.lock().await;

        let mut order = self
            .store
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        if order.status.is_terminal() {
            debug!(order_id = %order_id, status = %order.status, "Cancel on terminal order is a no-op");
            return Ok(order);
        }

        if let Some(exchange_order_id) = order.exchange_order_id.clone() {
            let adapter = self
                .adapters
                .get(order.run_id)
                .ok_or(OrderError::NoAdapter(order.run_id))?;
            match adapter.cancel(&exchange_order_id).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    return Err(OrderError::AdapterUnavailable(e.to_string()))
                }
                Err(e) => return Err(OrderError::AdapterRejected(e.to_string())),
            }
        }

        order.transition(OrderStatus::Cancelled)?;
        self.store.update(&order).await?;
        self.emit(event_types::ORDERS_CANCELLED, &order, None, cause).await?;
        info!(order_id = %order_id, "Order cancelled");
        Ok(order)
    }

    /// Record one execution. Deduplicates by fill id, so at-least-once
    /// delivery of fill notifications is safe.
    pub async fn record_fill(
        &self,
        order_id: Uuid,
        fill: Fill,
        cause: Option<&Envelope>,
    ) -> Result<OrderState, OrderError> {
        let guard = self.guard(order_id);
        let _g = guard.lock().await;

        let mut order = self
            .store
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        if self.store.has_fill(&fill.fill_id).await? {
            debug!(order_id = %order_id, fill_id = %fill.fill_id, "Duplicate fill ignored");
            return Ok(order);
        }

        let status = order.apply_fill(fill.clone())?;
        self.store.append_fill(&fill).await?;
        self.store.update(&order).await?;

        let event_type = match status {
            OrderStatus::Filled => event_types::ORDERS_FILLED,
            _ => event_types::ORDERS_PARTIALLY_FILLED,
        };
        self.emit(event_type, &order, Some(&fill), cause).await?;
        Ok(order)
    }

    /// Reconcile one order against the exchange's view: absorb missed fills
    /// and terminal transitions observed by polling.
    pub async fn sync_from_exchange(&self, order_id: Uuid) -> Result<OrderState, OrderError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        let exchange_order_id = match (&order.exchange_order_id, order.status.is_terminal()) {
            (Some(id), false) => id.clone(),
            _ => return Ok(order),
        };

        let adapter = self
            .adapters
            .get(order.run_id)
            .ok_or(OrderError::NoAdapter(order.run_id))?;
        let snapshot = match adapter.get_order(&exchange_order_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() => {
                return Err(OrderError::AdapterUnavailable(e.to_string()))
            }
            Err(e) => return Err(OrderError::AdapterRejected(e.to_string())),
        };

        // Fills reported individually win; otherwise synthesize the delta
        // from the aggregate with a deterministic id so re-polls dedupe.
        let mut order = order;
        if !snapshot.fills.is_empty() {
            for mut fill in snapshot.fills {
                fill.order_id = order.id;
                order = self.record_fill(order.id, fill, None).await?;
            }
        } else if snapshot.filled_quantity > order.filled_quantity {
            let delta = snapshot.filled_quantity - order.filled_quantity;
            let price = snapshot
                .avg_fill_price
                .or(order.avg_fill_price)
                .unwrap_or_default();
            let mut fill = Fill::new(order.id, delta, price, rust_decimal::Decimal::ZERO, chrono::Utc::now());
            fill.fill_id = format!("{}-{}", exchange_order_id, snapshot.filled_quantity);
            order = self.record_fill(order.id, fill, None).await?;
        }

        if order.status.is_terminal() {
            return Ok(order);
        }

        // Terminal transitions observed on the exchange side.
        let (next, event_type) = match snapshot.status {
            OrderStatus::Cancelled => (Some(OrderStatus::Cancelled), event_types::ORDERS_CANCELLED),
            OrderStatus::Expired => (Some(OrderStatus::Expired), event_types::ORDERS_EXPIRED),
            OrderStatus::Rejected => (Some(OrderStatus::Rejected), event_types::ORDERS_REJECTED),
            OrderStatus::Accepted if order.status == OrderStatus::Submitted => {
                (Some(OrderStatus::Accepted), event_types::ORDERS_ACCEPTED)
            }
            _ => (None, ""),
        };
        if let Some(next) = next {
            let guard = self.guard(order.id);
            let _g = guard.lock().await;
            order.transition(next)?;
            self.store.update(&order).await?;
            self.emit(event_type, &order, None, None).await?;
        }

        Ok(order)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderState, OrderError> {
        self.store
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Orders of one run, or every persisted order when `run_id` is absent.
    pub async fn list(&self, run_id: Option<Uuid>) -> Result<Vec<OrderState>, OrderError> {
        Ok(self.store.list(run_id).await?)
    }

    pub async fn list_open(&self) -> Result<Vec<OrderState>, OrderError> {
        Ok(self.store.list_open().await?)
    }

    /// Drop the mutation guard for a finished order.
    pub fn release_guard(&self, order_id: Uuid) {
        self.guards.remove(&order_id);
    }
}
