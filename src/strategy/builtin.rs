//! Built-in strategies
//!
//! Linked-in implementations resolvable through the plugin loader's
//! `builtin:` entries. Deliberately small: they exist to exercise the
//! pipeline and to serve as templates.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{DataWindow, OrderRequest, Strategy, StrategyAction};
use crate::clock::ClockTick;
use crate::orders::Side;

/// Buys one unit of the primary symbol on every tick.
///
/// The client order id is derived from the bar index, so a redelivered
/// tick cannot double-buy.
#[derive(Debug)]
pub struct TickBuyer {
    symbol: String,
    quantity: Decimal,
}

impl TickBuyer {
    pub fn new(symbol: &str, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity,
        }
    }
}

#[async_trait]
impl Strategy for TickBuyer {
    fn id(&self) -> &str {
        "tick_buyer"
    }

    async fn on_tick(&mut self, tick: &ClockTick) -> anyhow::Result<Vec<StrategyAction>> {
        Ok(vec![StrategyAction::PlaceOrder(OrderRequest::market(
            &format!("tick-buyer-{}", tick.bar_index),
            &self.symbol,
            Side::Buy,
            self.quantity,
        ))])
    }

    async fn on_data(&mut self, _window: &DataWindow) -> anyhow::Result<Vec<StrategyAction>> {
        Ok(Vec::new())
    }
}

/// Classic moving-average crossover.
///
/// Each tick requests a window long enough for the slow average; on data,
/// the fast average crossing above the slow one opens a long position and
/// crossing below closes it.
#[derive(Debug)]
pub struct SmaCross {
    symbol: String,
    quantity: Decimal,
    fast: usize,
    slow: usize,
    long: bool,
}

impl SmaCross {
    pub fn new(symbol: &str, quantity: Decimal, fast: usize, slow: usize) -> Self {
        debug_assert!(fast < slow, "fast period must be shorter than slow");
        Self {
            symbol: symbol.to_string(),
            quantity,
            fast,
            slow,
            long: false,
        }
    }

    fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
        if closes.len() < period || period == 0 {
            return None;
        }
        let sum: Decimal = closes[closes.len() - period..].iter().sum();
        Some(sum / Decimal::from(period as u64))
    }
}

#[async_trait]
impl Strategy for SmaCross {
    fn id(&self) -> &str {
        "sma_cross"
    }

    async fn on_tick(&mut self, _tick: &ClockTick) -> anyhow::Result<Vec<StrategyAction>> {
        Ok(vec![StrategyAction::FetchWindow {
            symbol: self.symbol.clone(),
            lookback: self.slow as u32 + 1,
        }])
    }

    async fn on_data(&mut self, window: &DataWindow) -> anyhow::Result<Vec<StrategyAction>> {
        let closes: Vec<Decimal> = window.bars.iter().map(|b| b.close).collect();
        let (Some(fast), Some(slow)) = (
            Self::sma(&closes, self.fast),
            Self::sma(&closes, self.slow),
        ) else {
            return Ok(Vec::new());
        };

        let stamp = window.end_ts.timestamp();
        if fast > slow && !self.long {
            self.long = true;
            return Ok(vec![StrategyAction::PlaceOrder(OrderRequest::market(
                &format!("sma-buy-{stamp}"),
                &self.symbol,
                Side::Buy,
                self.quantity,
            ))]);
        }
        if fast < slow && self.long {
            self.long = false;
            return Ok(vec![StrategyAction::PlaceOrder(OrderRequest::market(
                &format!("sma-sell-{stamp}"),
                &self.symbol,
                Side::Sell,
                self.quantity,
            ))]);
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeframe;
    use crate::market::Bar;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn tick(bar_index: u64) -> ClockTick {
        ClockTick {
            run_id: Uuid::nil(),
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            timeframe: Timeframe::H1,
            bar_index,
            is_backtest: true,
        }
    }

    fn window(closes: &[Decimal]) -> DataWindow {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| Bar {
                symbol: "BTC/USD".to_string(),
                timeframe: Timeframe::H1,
                ts: Utc.timestamp_opt(1_700_000_000 + i as i64 * 3600, 0).unwrap(),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: dec!(1),
                trade_count: None,
                vwap: None,
            })
            .collect();
        DataWindow {
            symbol: "BTC/USD".to_string(),
            end_ts: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            bars,
        }
    }

    #[tokio::test]
    async fn test_tick_buyer_buys_every_tick_idempotently() {
        let mut strategy = TickBuyer::new("BTC/USD", dec!(1));
        let first = strategy.on_tick(&tick(0)).await.unwrap();
        let again = strategy.on_tick(&tick(0)).await.unwrap();

        assert_eq!(first.len(), 1);
        // Same bar index yields the same idempotency key.
        assert_eq!(first, again);
        match &first[0] {
            StrategyAction::PlaceOrder(req) => {
                assert_eq!(req.client_order_id, "tick-buyer-0");
                assert_eq!(req.side, Side::Buy);
            }
            other => panic!("expected order, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sma_cross_enters_and_exits() {
        let mut strategy = SmaCross::new("BTC/USD", dec!(1), 2, 3);

        // Rising closes: fast above slow, enter long.
        let actions = strategy.on_data(&window(&[dec!(1), dec!(2), dec!(3), dec!(4)])).await.unwrap();
        assert!(matches!(
            actions.as_slice(),
            [StrategyAction::PlaceOrder(req)] if req.side == Side::Buy
        ));

        // Still rising: already long, no action.
        let actions = strategy.on_data(&window(&[dec!(2), dec!(3), dec!(4), dec!(5)])).await.unwrap();
        assert!(actions.is_empty());

        // Falling closes: fast below slow, exit.
        let actions = strategy.on_data(&window(&[dec!(5), dec!(4), dec!(3), dec!(2)])).await.unwrap();
        assert!(matches!(
            actions.as_slice(),
            [StrategyAction::PlaceOrder(req)] if req.side == Side::Sell
        ));
    }

    #[tokio::test]
    async fn test_sma_cross_needs_enough_bars() {
        let mut strategy = SmaCross::new("BTC/USD", dec!(1), 2, 3);
        let actions = strategy.on_data(&window(&[dec!(1), dec!(2)])).await.unwrap();
        assert!(actions.is_empty());
    }
}
