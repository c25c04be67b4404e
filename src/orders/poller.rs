//! Fill reconciliation worker
//!
//! Background worker that polls the exchange view of open orders and feeds
//! missed fills and terminal transitions back through the manager. Live and
//! paper fills arrive this way when no streaming channel is attached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::manager::OrderManager;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often to scan open orders.
    pub poll_interval: Duration,
    /// Maximum orders reconciled per scan.
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

pub struct FillPoller {
    manager: Arc<OrderManager>,
    config: PollerConfig,
}

impl FillPoller {
    pub fn new(manager: Arc<OrderManager>, config: PollerConfig) -> Self {
        Self { manager, config }
    }

    pub fn with_defaults(manager: Arc<OrderManager>) -> Self {
        Self::new(manager, PollerConfig::default())
    }

    /// Run a single reconciliation cycle. Returns how many orders were
    /// checked.
    pub async fn scan_once(&self) -> usize {
        let open = match self.manager.list_open().await {
            Ok(open) => open,
            Err(e) => {
                error!(error = %e, "Open order scan failed");
                return 0;
            }
        };

        let mut checked = 0;
        for order in open.iter().take(self.config.batch_size) {
            match self.manager.sync_from_exchange(order.id).await {
                Ok(synced) => {
                    if synced.status != order.status {
                        info!(
                            order_id = %order.id,
                            old_status = %order.status,
                            new_status = %synced.status,
                            "Order reconciled from exchange"
                        );
                    }
                }
                Err(e) => {
                    error!(order_id = %order.id, error = %e, "Order reconciliation failed");
                }
            }
            checked += 1;
        }

        if checked > 0 {
            debug!(checked, "Fill poll complete");
        }
        checked
    }

    /// Poll until `stop_rx` flips to true.
    pub async fn run(&self, mut stop_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Fill poller started"
        );
        loop {
            if *stop_rx.borrow() {
                break;
            }
            self.scan_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = stop_rx.changed() => {}
            }
        }
        info!("Fill poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 100);
    }
}
