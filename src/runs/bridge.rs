//! Live bridge - serves `live.*` commands through an exchange adapter
//!
//! The per-run counterpart of the backtest engine for paper and live runs:
//! window fetches go to the adapter's historical bars endpoint, order
//! placement goes through the order manager. Transient adapter failures
//! are retried with backoff; exhausted retries land on the run's error
//! channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::{AdapterError, ExchangeAdapter};
use crate::clock::Timeframe;
use crate::event_log::{run_filter, EventLog, SubscriptionId};
use crate::events::{
    event_types, DataWindowPayload, FetchWindowPayload, WindowChunkPayload,
};
use crate::market::Bar;
use crate::orders::{OrderError, OrderIntent, OrderManager};

const PRODUCER: &str = "live_bridge";
/// Windows above this size additionally emit progress chunks.
const CHUNK_SIZE: usize = 1_000;
const FETCH_ATTEMPTS: u32 = 3;
const FETCH_BACKOFF: Duration = Duration::from_millis(250);

pub struct LiveBridge {
    run_id: Uuid,
    timeframe: Timeframe,
    log: Arc<dyn EventLog>,
    adapter: Arc<dyn ExchangeAdapter>,
    order_manager: Arc<OrderManager>,
    error_tx: mpsc::UnboundedSender<String>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl LiveBridge {
    pub fn new(
        run_id: Uuid,
        timeframe: Timeframe,
        log: Arc<dyn EventLog>,
        adapter: Arc<dyn ExchangeAdapter>,
        order_manager: Arc<OrderManager>,
        error_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            run_id,
            timeframe,
            log,
            adapter,
            order_manager,
            error_tx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Attach the run-scoped subscriptions.
    pub fn initialize(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");

        let run_id = self.run_id;
        let timeframe = self.timeframe;
        let log = self.log.clone();
        let adapter = self.adapter.clone();
        let error_tx = self.error_tx.clone();
        subscriptions.push(self.log.subscribe(
            "live_bridge.fetch_window",
            &[event_types::LIVE_FETCH_WINDOW],
            Some(run_filter(run_id)),
            Arc::new(move |delivery| {
                let log = log.clone();
                let adapter = adapter.clone();
                let error_tx = error_tx.clone();
                Box::pin(async move {
                    let request: FetchWindowPayload = delivery.envelope.payload_as()?;
                    let end_ts = request.end_ts.unwrap_or_else(Utc::now);
                    let span_secs = timeframe.duration_secs() * (request.lookback as i64 + 1);
                    let start = end_ts - chrono::Duration::seconds(span_secs);

                    let bars = match fetch_with_retries(
                        adapter.as_ref(),
                        &request.symbol,
                        timeframe,
                        start,
                        end_ts,
                    )
                    .await
                    {
                        Ok(mut bars) => {
                            // The adapter may return more than asked for.
                            let skip = bars.len().saturating_sub(request.lookback as usize);
                            bars.drain(..skip);
                            bars
                        }
                        Err(e) => {
                            let message = format!("window fetch failed: {e}");
                            let _ = error_tx.send(message.clone());
                            anyhow::bail!(message);
                        }
                    };

                    // Oversized responses announce progress in chunks.
                    if bars.len() > CHUNK_SIZE {
                        for (index, chunk) in bars.chunks(CHUNK_SIZE).enumerate() {
                            let chunk_payload = WindowChunkPayload {
                                symbol: request.symbol.clone(),
                                chunk_index: index as u32,
                                last: (index + 1) * CHUNK_SIZE >= bars.len(),
                                bars: chunk.to_vec(),
                            };
                            let envelope =
                                delivery.envelope.caused_by(PRODUCER, &chunk_payload);
                            log.append(envelope).await?;
                        }
                    }

                    let payload = DataWindowPayload {
                        symbol: request.symbol,
                        end_ts,
                        bars,
                    };
                    let envelope = delivery.envelope.caused_by(PRODUCER, &payload);
                    log.append(envelope).await?;
                    Ok(())
                })
            }),
        ));

        let order_manager = self.order_manager.clone();
        let error_tx = self.error_tx.clone();
        subscriptions.push(self.log.subscribe(
            "live_bridge.place_order",
            &[event_types::LIVE_PLACE_ORDER],
            Some(run_filter(run_id)),
            Arc::new(move |delivery| {
                let order_manager = order_manager.clone();
                let error_tx = error_tx.clone();
                Box::pin(async move {
                    let intent: OrderIntent = delivery.envelope.payload_as()?;
                    match order_manager.submit(&intent, Some(&delivery.envelope)).await {
                        Ok(order) => {
                            debug!(order_id = %order.id, status = %order.status, "Live order placed");
                            Ok(())
                        }
                        // The exchange is unreachable; the run cannot trade.
                        Err(OrderError::AdapterUnavailable(message)) => {
                            let message = format!("order submission failed: {message}");
                            let _ = error_tx.send(message.clone());
                            anyhow::bail!(message);
                        }
                        Err(e) => {
                            warn!(error = %e, "Live order placement failed");
                            anyhow::bail!(e.to_string());
                        }
                    }
                })
            }),
        ));
    }

    /// Remove subscriptions.
    pub fn cleanup(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription lock");
        for id in subscriptions.drain(..) {
            self.log.unsubscribe(id);
        }
        debug!(run_id = %self.run_id, "Live bridge cleaned up");
    }
}

impl Drop for LiveBridge {
    fn drop(&mut self) {
        // Subscriptions must not outlive the bridge, even on abort paths.
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

async fn fetch_with_retries(
    adapter: &dyn ExchangeAdapter,
    symbol: &str,
    timeframe: Timeframe,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
) -> Result<Vec<Bar>, AdapterError> {
    let mut backoff = FETCH_BACKOFF;
    let mut last_err = None;
    for attempt in 1..=FETCH_ATTEMPTS {
        match adapter.get_bars(symbol, timeframe, start, end).await {
            Ok(bars) => return Ok(bars),
            Err(e) if e.is_transient() && attempt < FETCH_ATTEMPTS => {
                warn!(symbol = %symbol, attempt, error = %e, "Bar fetch failed; backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| AdapterError::Connection("retries exhausted".to_string())))
}
