//! Deterministic fill simulation
//!
//! Prices one order against historical bars. Pure functions of the inputs:
//! identical bars and an identical order sequence yield identical fills.
//!
//! Policy: market orders fill at the next bar's open (falling back to the
//! last known close when the boundary bar is missing); limit orders fill
//! only when the bar range crosses the limit; stop orders become market once
//! touched; stop-limit orders arm their limit once touched. Slippage and
//! commission are configurable per run.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::market::Bar;
use crate::orders::{OrderIntent, OrderType, Side};

const BPS_DENOMINATOR: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);
const PERCENT_DENOMINATOR: Decimal = Decimal::ONE_HUNDRED;

/// Slippage applied to market (and triggered stop) fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    None,
    /// Fixed basis points against the trade direction.
    Bps { bps: Decimal },
    /// Percentage of the fill bar's high-low range against the direction.
    PctOfRange { pct: Decimal },
}

/// Commission charged per fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    None,
    Fixed { amount: Decimal },
    PerShare { amount: Decimal },
    Percentage { pct: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillPolicy {
    pub slippage: SlippageModel,
    pub commission: CommissionModel,
}

impl Default for FillPolicy {
    fn default() -> Self {
        Self {
            slippage: SlippageModel::None,
            commission: CommissionModel::None,
        }
    }
}

/// A priced simulated execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
}

/// Outcome of pricing one order against one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOutcome {
    Filled(SimulatedFill),
    Rejected(String),
}

#[derive(Debug)]
pub struct FillSimulator {
    policy: FillPolicy,
}

impl FillSimulator {
    pub fn new(policy: FillPolicy) -> Self {
        Self { policy }
    }

    /// Price `intent` at its effective timestamp.
    ///
    /// `boundary_bar` is the bar starting at the order's tick boundary (the
    /// next bar relative to the data the strategy saw); `last_bar` is the
    /// most recent bar at or before the boundary. At least one must be
    /// present or the order is rejected for lack of data.
    pub fn simulate(
        &self,
        intent: &OrderIntent,
        boundary_bar: Option<&Bar>,
        last_bar: Option<&Bar>,
    ) -> SimOutcome {
        let reference = match boundary_bar.or(last_bar) {
            Some(bar) => bar,
            None => return SimOutcome::Rejected("no bars available at order time".to_string()),
        };

        // Market entry price: next bar open when available, else last close.
        let market_price = match boundary_bar {
            Some(bar) => bar.open,
            None => reference.close,
        };

        let raw_price = match intent.order_type {
            OrderType::Market => market_price,
            OrderType::Limit => {
                let limit = intent.limit_price.expect("validated limit order has a price");
                match self.limit_fill_price(intent.side, limit, reference, market_price) {
                    Some(price) => return self.fill_at(intent, price, reference, false),
                    None => {
                        return SimOutcome::Rejected(format!(
                            "limit price {limit} not reached in bar"
                        ))
                    }
                }
            }
            OrderType::Stop => {
                let stop = intent.stop_price.expect("validated stop order has a price");
                if !Self::stop_touched(intent.side, stop, reference) {
                    return SimOutcome::Rejected(format!("stop price {stop} not touched in bar"));
                }
                // Once touched the order is a market order; a gap through
                // the stop fills at the open.
                match intent.side {
                    Side::Buy => market_price.max(stop),
                    Side::Sell => market_price.min(stop),
                }
            }
            OrderType::StopLimit => {
                let stop = intent.stop_price.expect("validated stop order has a price");
                let limit = intent.limit_price.expect("validated limit order has a price");
                if !Self::stop_touched(intent.side, stop, reference) {
                    return SimOutcome::Rejected(format!("stop price {stop} not touched in bar"));
                }
                match self.limit_fill_price(intent.side, limit, reference, market_price) {
                    Some(price) => return self.fill_at(intent, price, reference, false),
                    None => {
                        return SimOutcome::Rejected(format!(
                            "limit price {limit} not reached after stop trigger"
                        ))
                    }
                }
            }
        };

        self.fill_at(intent, raw_price, reference, true)
    }

    /// Where a limit order fills within the bar, if it does. An open that
    /// already crosses the limit fills at the better open price.
    fn limit_fill_price(
        &self,
        side: Side,
        limit: Decimal,
        bar: &Bar,
        market_price: Decimal,
    ) -> Option<Decimal> {
        match side {
            Side::Buy => {
                if market_price <= limit {
                    Some(market_price)
                } else if bar.low <= limit {
                    Some(limit)
                } else {
                    None
                }
            }
            Side::Sell => {
                if market_price >= limit {
                    Some(market_price)
                } else if bar.high >= limit {
                    Some(limit)
                } else {
                    None
                }
            }
        }
    }

    fn stop_touched(side: Side, stop: Decimal, bar: &Bar) -> bool {
        match side {
            Side::Buy => bar.high >= stop,
            Side::Sell => bar.low <= stop,
        }
    }

    fn fill_at(
        &self,
        intent: &OrderIntent,
        price: Decimal,
        reference: &Bar,
        apply_slippage: bool,
    ) -> SimOutcome {
        let price = if apply_slippage {
            self.slipped(price, intent.side, reference)
        } else {
            price
        };
        let fee = self.commission(price, intent.quantity);
        SimOutcome::Filled(SimulatedFill {
            price,
            quantity: intent.quantity,
            fee,
        })
    }

    fn slipped(&self, price: Decimal, side: Side, reference: &Bar) -> Decimal {
        let adjustment = match &self.policy.slippage {
            SlippageModel::None => Decimal::ZERO,
            SlippageModel::Bps { bps } => price * *bps / BPS_DENOMINATOR,
            SlippageModel::PctOfRange { pct } => reference.range() * *pct / PERCENT_DENOMINATOR,
        };
        match side {
            Side::Buy => price + adjustment,
            Side::Sell => price - adjustment,
        }
    }

    fn commission(&self, price: Decimal, quantity: Decimal) -> Decimal {
        match &self.policy.commission {
            CommissionModel::None => Decimal::ZERO,
            CommissionModel::Fixed { amount } => *amount,
            CommissionModel::PerShare { amount } => *amount * quantity,
            CommissionModel::Percentage { pct } => price * quantity * *pct / PERCENT_DENOMINATOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeframe;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            symbol: "BTC/USD".to_string(),
            timeframe: Timeframe::H1,
            ts: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(100),
            trade_count: None,
            vwap: None,
        }
    }

    fn intent(side: Side, order_type: OrderType) -> OrderIntent {
        OrderIntent {
            client_order_id: "c1".to_string(),
            run_id: Uuid::nil(),
            symbol: "BTC/USD".to_string(),
            side,
            order_type,
            quantity: dec!(2),
            limit_price: None,
            stop_price: None,
            time_in_force: None,
        }
    }

    fn sim() -> FillSimulator {
        FillSimulator::new(FillPolicy::default())
    }

    #[test]
    fn test_market_fills_at_next_bar_open() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let outcome = sim().simulate(&intent(Side::Buy, OrderType::Market), Some(&b), Some(&b));
        assert_eq!(
            outcome,
            SimOutcome::Filled(SimulatedFill {
                price: dec!(100),
                quantity: dec!(2),
                fee: dec!(0),
            })
        );
    }

    #[test]
    fn test_market_falls_back_to_last_close() {
        let last = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let outcome = sim().simulate(&intent(Side::Buy, OrderType::Market), None, Some(&last));
        match outcome {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(105)),
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[test]
    fn test_no_bars_rejects() {
        let outcome = sim().simulate(&intent(Side::Buy, OrderType::Market), None, None);
        assert!(matches!(outcome, SimOutcome::Rejected(_)));
    }

    #[test]
    fn test_limit_buy_requires_crossing() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));

        let mut buy = intent(Side::Buy, OrderType::Limit);
        buy.limit_price = Some(dec!(97));
        match sim().simulate(&buy, Some(&b), Some(&b)) {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(97)),
            other => panic!("expected fill, got {other:?}"),
        }

        buy.limit_price = Some(dec!(90));
        assert!(matches!(
            sim().simulate(&buy, Some(&b), Some(&b)),
            SimOutcome::Rejected(_)
        ));

        // Open already below the limit fills at the better open.
        buy.limit_price = Some(dec!(102));
        match sim().simulate(&buy, Some(&b), Some(&b)) {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(100)),
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[test]
    fn test_sell_limit_mirrors_buy() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let mut sell = intent(Side::Sell, OrderType::Limit);
        sell.limit_price = Some(dec!(108));
        match sim().simulate(&sell, Some(&b), Some(&b)) {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(108)),
            other => panic!("expected fill, got {other:?}"),
        }

        sell.limit_price = Some(dec!(115));
        assert!(matches!(
            sim().simulate(&sell, Some(&b), Some(&b)),
            SimOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_stop_becomes_market_once_touched() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let mut stop = intent(Side::Buy, OrderType::Stop);
        stop.stop_price = Some(dec!(104));
        match sim().simulate(&stop, Some(&b), Some(&b)) {
            // Stop above the open: triggered intrabar, fills at the stop.
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(104)),
            other => panic!("expected fill, got {other:?}"),
        }

        stop.stop_price = Some(dec!(120));
        assert!(matches!(
            sim().simulate(&stop, Some(&b), Some(&b)),
            SimOutcome::Rejected(_)
        ));
    }

    #[test]
    fn test_slippage_bps_directional() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let sim = FillSimulator::new(FillPolicy {
            slippage: SlippageModel::Bps { bps: dec!(10) },
            commission: CommissionModel::None,
        });

        match sim.simulate(&intent(Side::Buy, OrderType::Market), Some(&b), Some(&b)) {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(100.10)),
            other => panic!("expected fill, got {other:?}"),
        }
        match sim.simulate(&intent(Side::Sell, OrderType::Market), Some(&b), Some(&b)) {
            SimOutcome::Filled(fill) => assert_eq!(fill.price, dec!(99.90)),
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[test]
    fn test_commission_models() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let cases = [
            (CommissionModel::Fixed { amount: dec!(1.5) }, dec!(1.5)),
            (CommissionModel::PerShare { amount: dec!(0.25) }, dec!(0.5)),
            (CommissionModel::Percentage { pct: dec!(0.1) }, dec!(0.2)),
        ];
        for (commission, expected_fee) in cases {
            let sim = FillSimulator::new(FillPolicy {
                slippage: SlippageModel::None,
                commission,
            });
            match sim.simulate(&intent(Side::Buy, OrderType::Market), Some(&b), Some(&b)) {
                SimOutcome::Filled(fill) => assert_eq!(fill.fee, expected_fee),
                other => panic!("expected fill, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let b = bar(dec!(100), dec!(110), dec!(95), dec!(105));
        let sim = FillSimulator::new(FillPolicy {
            slippage: SlippageModel::PctOfRange { pct: dec!(5) },
            commission: CommissionModel::Percentage { pct: dec!(0.1) },
        });
        let order = intent(Side::Buy, OrderType::Market);
        let first = sim.simulate(&order, Some(&b), Some(&b));
        let second = sim.simulate(&order, Some(&b), Some(&b));
        assert_eq!(first, second);
    }
}
