//! SSE broadcaster - hands log events to the transport layer
//!
//! Subscribes to the log with a wildcard filter and fans every envelope out
//! to registered transport clients. Each client owns a bounded queue; a
//! slow consumer drops frames with a logged warning and never back-
//! pressures the log. Reconnecting clients replay from their last seen
//! sequence via [`SseBroadcaster::replay_from`].
//!
//! Frame shape: the SSE `event:` field carries the envelope type verbatim;
//! the `data:` field carries the entire serialized envelope (not just the
//! payload), so every consumer sees one uniform shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event_log::{EventLog, EventLogError, SubscriptionId};
use crate::events::Seq;

/// One frame ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// Log sequence; serves as the SSE `id:` for Last-Event-ID resumption.
    pub id: Seq,
    /// Envelope type, case-sensitive, for the SSE `event:` field.
    pub event: String,
    /// The full envelope as JSON, for the SSE `data:` field.
    pub data: String,
}

struct Client {
    queue: Arc<ArrayQueue<SseFrame>>,
    notify: Arc<Notify>,
    run_filter: Option<Uuid>,
}

/// Consumer handle held by a transport connection.
pub struct SseClientHandle {
    pub id: u64,
    queue: Arc<ArrayQueue<SseFrame>>,
    notify: Arc<Notify>,
}

impl SseClientHandle {
    /// Next frame, waiting if the queue is empty.
    pub async fn next_frame(&self) -> SseFrame {
        loop {
            if let Some(frame) = self.queue.pop() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    /// Next frame if one is already buffered.
    pub fn try_next(&self) -> Option<SseFrame> {
        self.queue.pop()
    }
}

pub struct SseBroadcaster {
    log: Arc<dyn EventLog>,
    clients: Arc<DashMap<u64, Client>>,
    next_client_id: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl SseBroadcaster {
    /// Per-client buffer capacity used by [`register_client`].
    ///
    /// [`register_client`]: SseBroadcaster::register_client
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            clients: Arc::new(DashMap::new()),
            next_client_id: AtomicU64::new(1),
            subscription: Mutex::new(None),
        }
    }

    /// Attach to the log. Call once at startup.
    pub fn start(&self) {
        let clients = self.clients.clone();
        let id = self.log.subscribe(
            "sse_broadcaster",
            &["*"],
            None,
            Arc::new(move |delivery| {
                let clients = clients.clone();
                Box::pin(async move {
                    let data = serde_json::to_string(&delivery.envelope)?;
                    let frame = SseFrame {
                        id: delivery.seq,
                        event: delivery.envelope.event_type.clone(),
                        data,
                    };
                    for entry in clients.iter() {
                        let client = entry.value();
                        if let Some(run_id) = client.run_filter {
                            if delivery.envelope.run_id != Some(run_id) {
                                continue;
                            }
                        }
                        if client.queue.push(frame.clone()).is_err() {
                            warn!(
                                client_id = entry.key(),
                                seq = delivery.seq,
                                "SSE client buffer full; frame dropped"
                            );
                        }
                        client.notify.notify_one();
                    }
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

    /// Register a transport connection, optionally filtered to one run.
    pub fn register_client(&self, run_filter: Option<Uuid>) -> SseClientHandle {
        self.register_client_with_capacity(run_filter, Self::DEFAULT_CAPACITY)
    }

    pub fn register_client_with_capacity(
        &self,
        run_filter: Option<Uuid>,
        capacity: usize,
    ) -> SseClientHandle {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ArrayQueue::new(capacity));
        let notify = Arc::new(Notify::new());
        self.clients.insert(
            id,
            Client {
                queue: queue.clone(),
                notify: notify.clone(),
                run_filter,
            },
        );
        debug!(client_id = id, ?run_filter, "SSE client registered");
        SseClientHandle { id, queue, notify }
    }

    /// Idempotent; unknown clients are a no-op.
    pub fn remove_client(&self, client_id: u64) {
        self.clients.remove(&client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Frames after `seq`, for Last-Event-ID reconnection.
    pub async fn replay_from(
        &self,
        after_seq: Seq,
        limit: u32,
        run_filter: Option<Uuid>,
    ) -> Result<Vec<SseFrame>, EventLogError> {
        let records = self.log.read_from(after_seq, limit).await?;
        let mut frames = Vec::with_capacity(records.len());
        for record in records {
            if let Some(run_id) = run_filter {
                if record.envelope.run_id != Some(run_id) {
                    continue;
                }
            }
            frames.push(SseFrame {
                id: record.seq,
                event: record.envelope.event_type.clone(),
                data: serde_json::to_string(&record.envelope)?,
            });
        }
        Ok(frames)
    }
}
