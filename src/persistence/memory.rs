//! In-memory store implementations for isolated tests
//!
//! Behaviorally equivalent to the PostgreSQL stores for every operation the
//! core exercises, minus durability.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{BarStore, OrderStore, RunStore, StoreError};
use crate::clock::Timeframe;
use crate::market::Bar;
use crate::orders::{Fill, OrderState};
use crate::runs::{Run, RunMode, RunStatus};

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.lock().expect("run lock").insert(run.id, run.clone());
        Ok(())
    }

    async fn update(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.lock().expect("run lock").insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.lock().expect("run lock").get(&id).cloned())
    }

    async fn list(
        &self,
        mode: Option<RunMode>,
        status: Option<RunStatus>,
    ) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.lock().expect("run lock");
        let mut out: Vec<Run> = runs
            .values()
            .filter(|r| mode.map_or(true, |m| r.mode == m))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, OrderState>>,
    fills: Mutex<Vec<Fill>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hydrate(&self, mut order: OrderState) -> OrderState {
        let fills = self.fills.lock().expect("fill lock");
        order.fills = fills
            .iter()
            .filter(|f| f.order_id == order.id)
            .cloned()
            .collect();
        order
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &OrderState) -> Result<(), StoreError> {
        let mut stripped = order.clone();
        stripped.fills = Vec::new();
        self.orders
            .lock()
            .expect("order lock")
            .insert(order.id, stripped);
        Ok(())
    }

    async fn update(&self, order: &OrderState) -> Result<(), StoreError> {
        self.insert(order).await
    }

    async fn append_fill(&self, fill: &Fill) -> Result<(), StoreError> {
        let mut fills = self.fills.lock().expect("fill lock");
        if !fills.iter().any(|f| f.fill_id == fill.fill_id) {
            fills.push(fill.clone());
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OrderState>, StoreError> {
        let order = self.orders.lock().expect("order lock").get(&id).cloned();
        Ok(order.map(|o| self.hydrate(o)))
    }

    async fn find_by_client_id(
        &self,
        run_id: Uuid,
        client_order_id: &str,
    ) -> Result<Option<OrderState>, StoreError> {
        let order = self
            .orders
            .lock()
            .expect("order lock")
            .values()
            .find(|o| o.run_id == run_id && o.client_order_id == client_order_id)
            .cloned();
        Ok(order.map(|o| self.hydrate(o)))
    }

    async fn list(&self, run_id: Option<Uuid>) -> Result<Vec<OrderState>, StoreError> {
        let orders: Vec<OrderState> = self
            .orders
            .lock()
            .expect("order lock")
            .values()
            .filter(|o| run_id.map_or(true, |id| o.run_id == id))
            .cloned()
            .collect();
        let mut out: Vec<OrderState> = orders.into_iter().map(|o| self.hydrate(o)).collect();
        out.sort_by_key(|o| o.created_at);
        Ok(out)
    }

    async fn list_open(&self) -> Result<Vec<OrderState>, StoreError> {
        let orders: Vec<OrderState> = self
            .orders
            .lock()
            .expect("order lock")
            .values()
            .filter(|o| o.status.is_open())
            .cloned()
            .collect();
        let mut out: Vec<OrderState> = orders.into_iter().map(|o| self.hydrate(o)).collect();
        out.sort_by_key(|o| o.created_at);
        Ok(out)
    }

    async fn has_fill(&self, fill_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .fills
            .lock()
            .expect("fill lock")
            .iter()
            .any(|f| f.fill_id == fill_id))
    }
}

#[derive(Default)]
pub struct MemoryBarStore {
    bars: Mutex<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed helper for tests.
    pub async fn seed(&self, bars: Vec<Bar>) {
        self.upsert(&bars).await.expect("memory upsert is infallible");
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn upsert(&self, bars: &[Bar]) -> Result<u64, StoreError> {
        let mut map = self.bars.lock().expect("bar lock");
        for bar in bars {
            let series = map
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default();
            match series.binary_search_by_key(&bar.ts, |b| b.ts) {
                Ok(i) => series[i] = bar.clone(),
                Err(i) => series.insert(i, bar.clone()),
            }
        }
        Ok(bars.len() as u64)
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let map = self.bars.lock().expect("bar lock");
        Ok(map
            .get(&(symbol.to_string(), timeframe))
            .map(|series| {
                series
                    .iter()
                    .filter(|b| b.ts >= start && b.ts <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn window_ending_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        end_ts: DateTime<Utc>,
        lookback: u32,
    ) -> Result<Vec<Bar>, StoreError> {
        let map = self.bars.lock().expect("bar lock");
        Ok(map
            .get(&(symbol.to_string(), timeframe))
            .map(|series| {
                let upto: Vec<Bar> = series.iter().filter(|b| b.ts <= end_ts).cloned().collect();
                let skip = upto.len().saturating_sub(lookback as usize);
                upto.into_iter().skip(skip).collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(hour: u32) -> Bar {
        Bar {
            symbol: "BTC/USD".to_string(),
            timeframe: Timeframe::H1,
            ts: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close: dec!(105),
            volume: dec!(1),
            trade_count: None,
            vwap: None,
        }
    }

    #[tokio::test]
    async fn test_bar_window_ending_at() {
        let store = MemoryBarStore::new();
        store.seed((0..10).map(bar).collect()).await;

        let window = store
            .window_ending_at(
                "BTC/USD",
                Timeframe::H1,
                Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap(),
                3,
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].ts, Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(window[2].ts, Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_bar_upsert_replaces() {
        let store = MemoryBarStore::new();
        store.seed(vec![bar(0)]).await;
        let mut replacement = bar(0);
        replacement.close = dec!(999);
        store.seed(vec![replacement]).await;

        let bars = store
            .range(
                "BTC/USD",
                Timeframe::H1,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(999));
    }
}
