//! Offset-tracked log consumer
//!
//! Drives catch-up reads for consumers that must survive restart: read from
//! the stored offset, process, then advance the offset. Redelivery after a
//! crash is expected; handlers are responsible for idempotency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::subscribers::Delivery;
use super::{EventLog, EventLogError, OffsetStore};

#[async_trait]
pub trait EnvelopeHandler: Send {
    /// Process one delivery. Returning an error halts the current poll; the
    /// offset is not advanced past the failed envelope.
    async fn handle(&mut self, delivery: &Delivery) -> anyhow::Result<()>;
}

pub struct LogConsumer {
    name: String,
    log: Arc<dyn EventLog>,
    offsets: Arc<dyn OffsetStore>,
    batch_size: u32,
    poll_interval: Duration,
}

impl LogConsumer {
    pub fn new(name: &str, log: Arc<dyn EventLog>, offsets: Arc<dyn OffsetStore>) -> Self {
        Self {
            name: name.to_string(),
            log,
            offsets,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and process one batch. Returns how many envelopes were handled.
    ///
    /// The offset is advanced after each successfully handled envelope, so a
    /// crash mid-batch redelivers at most the in-flight one.
    pub async fn poll_once<H: EnvelopeHandler>(&self, handler: &mut H) -> Result<usize, EventLogError> {
        let after = self.offsets.get(&self.name).await?.unwrap_or(0);
        let records = self.log.read_from(after, self.batch_size).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut handled = 0;
        for record in records {
            let delivery = Delivery {
                seq: record.seq,
                envelope: record.envelope,
            };
            if let Err(e) = handler.handle(&delivery).await {
                error!(
                    consumer = %self.name,
                    seq = delivery.seq,
                    envelope_id = %delivery.envelope.id,
                    error = %e,
                    "Handler failed; offset not advanced"
                );
                break;
            }
            self.offsets.set(&self.name, delivery.seq).await?;
            handled += 1;
        }

        debug!(consumer = %self.name, handled, "Consumer poll complete");
        Ok(handled)
    }

    /// Poll until `stop_rx` flips to true. Sleeps between empty polls.
    pub async fn run<H: EnvelopeHandler>(&self, handler: &mut H, mut stop_rx: watch::Receiver<bool>) {
        info!(consumer = %self.name, "Log consumer started");
        loop {
            if *stop_rx.borrow() {
                break;
            }
            match self.poll_once(handler).await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(consumer = %self.name, error = %e, "Consumer poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        info!(consumer = %self.name, "Log consumer stopped");
    }
}
