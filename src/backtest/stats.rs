//! Run statistics
//!
//! Computed once at run completion from the position tracker's closing
//! trades and marks. Sharpe, Sortino and max drawdown are reserved fields
//! reported as zero until their computation lands.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};

use crate::events::RunStatsPayload;

const SECONDS_PER_YEAR: i64 = 31_557_600; // 365.25 days

/// Inputs gathered from a finished run.
#[derive(Debug, Clone)]
pub struct StatsInputs {
    pub initial_capital: Decimal,
    /// Realized P&L per closing trade, in order, fees excluded.
    pub closed_trades: Vec<Decimal>,
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub fees_paid: Decimal,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Compute the aggregate statistics for `run.Completed`.
pub fn compute(inputs: &StatsInputs) -> RunStatsPayload {
    let net_pnl = inputs.total_realized_pnl + inputs.total_unrealized_pnl - inputs.fees_paid;
    let total_return = if inputs.initial_capital.is_zero() {
        Decimal::ZERO
    } else {
        net_pnl / inputs.initial_capital
    };

    let wins = inputs.closed_trades.iter().filter(|t| **t > Decimal::ZERO).count();
    let trade_count = inputs.closed_trades.len();
    let win_rate = if trade_count == 0 {
        Decimal::ZERO
    } else {
        Decimal::from(wins as u64) / Decimal::from(trade_count as u64)
    };

    let gross_profit: Decimal = inputs
        .closed_trades
        .iter()
        .filter(|t| **t > Decimal::ZERO)
        .sum();
    let gross_loss: Decimal = inputs
        .closed_trades
        .iter()
        .filter(|t| **t < Decimal::ZERO)
        .map(|t| t.abs())
        .sum();
    // With no losing trades the gross profit itself is reported.
    let profit_factor = if gross_loss.is_zero() {
        gross_profit
    } else {
        gross_profit / gross_loss
    };

    RunStatsPayload {
        total_return,
        annualized_return: annualize(total_return, inputs.start, inputs.end),
        win_rate,
        profit_factor,
        sharpe: Decimal::ZERO,
        sortino: Decimal::ZERO,
        max_drawdown: Decimal::ZERO,
        trade_count: trade_count as u64,
    }
}

/// Compound `total_return` over the window to a yearly rate. Windows under
/// an hour, or a return at or below -100%, report zero.
fn annualize(total_return: Decimal, start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
    let elapsed_secs = (end - start).num_seconds();
    if elapsed_secs < 3_600 {
        return Decimal::ZERO;
    }
    let base = Decimal::ONE + total_return;
    if base <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let exponent = Decimal::from(SECONDS_PER_YEAR) / Decimal::from(elapsed_secs);
    match base.checked_powd(exponent) {
        Some(compounded) => compounded - Decimal::ONE,
        None => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn inputs(closed_trades: Vec<Decimal>) -> StatsInputs {
        let total_realized_pnl = closed_trades.iter().copied().sum();
        StatsInputs {
            initial_capital: dec!(100000),
            closed_trades,
            total_realized_pnl,
            total_unrealized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_total_return_and_win_rate() {
        let stats = compute(&inputs(vec![dec!(500), dec!(-200), dec!(700)]));
        assert_eq!(stats.total_return, dec!(0.01));
        // 2 of 3 trades won.
        assert_eq!(stats.win_rate.round_dp(4), dec!(0.6667));
        assert_eq!(stats.profit_factor, dec!(6));
        assert_eq!(stats.trade_count, 3);
    }

    #[test]
    fn test_no_trades_is_all_zeroes() {
        let stats = compute(&inputs(Vec::new()));
        assert_eq!(stats.total_return, Decimal::ZERO);
        assert_eq!(stats.win_rate, Decimal::ZERO);
        assert_eq!(stats.profit_factor, Decimal::ZERO);
        assert_eq!(stats.trade_count, 0);
    }

    #[test]
    fn test_reserved_fields_are_zero() {
        let stats = compute(&inputs(vec![dec!(100)]));
        assert_eq!(stats.sharpe, Decimal::ZERO);
        assert_eq!(stats.sortino, Decimal::ZERO);
        assert_eq!(stats.max_drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_annualized_exceeds_total_for_sub_year_window() {
        let mut i = inputs(vec![dec!(1000)]);
        i.end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let stats = compute(&i);
        assert!(stats.annualized_return > stats.total_return);
    }

    #[test]
    fn test_fees_reduce_return() {
        let mut i = inputs(vec![dec!(1000)]);
        i.fees_paid = dec!(500);
        let stats = compute(&i);
        assert_eq!(stats.total_return, dec!(0.005));
    }
}
