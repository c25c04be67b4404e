//! Sign-aware position tracking
//!
//! Quantities are signed: positive long, negative short. A fill against an
//! existing position first closes (realizing P&L), and only then opens in
//! the new direction; crossing through zero is explicit, never implicit in
//! an averaged entry price.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::orders::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity: negative is short.
    pub quantity: Decimal,
    /// Average entry price of the open quantity. Zero when flat.
    pub avg_entry_price: Decimal,
    /// Cumulative realized P&L for this symbol, fees excluded.
    pub realized_pnl: Decimal,
}

impl Position {
    fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Unrealized P&L at `mark`. The signed quantity makes one formula
    /// cover both directions.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        (mark - self.avg_entry_price) * self.quantity
    }
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    positions: FxHashMap<String, Position>,
    /// Realized P&L of each closing trade, in order. Drives win rate and
    /// profit factor.
    closed_trades: Vec<Decimal>,
    fees_paid: Decimal,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn closed_trades(&self) -> &[Decimal] {
        &self.closed_trades
    }

    pub fn fees_paid(&self) -> Decimal {
        self.fees_paid
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Apply one fill. Returns the P&L realized by this fill, fees
    /// excluded.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Decimal {
        self.fees_paid += fee;
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));

        let delta = side.sign() * quantity;
        let same_direction = position.quantity.is_zero()
            || (position.quantity.is_sign_positive() == delta.is_sign_positive());

        if same_direction {
            // Extending (or opening): average the entry.
            let old_abs = position.quantity.abs();
            let new_abs = old_abs + quantity;
            position.avg_entry_price =
                (position.avg_entry_price * old_abs + price * quantity) / new_abs;
            position.quantity += delta;
            return Decimal::ZERO;
        }

        // Opposing fill: close up to the open quantity first.
        let open_abs = position.quantity.abs();
        let closing = quantity.min(open_abs);
        let direction = if position.quantity.is_sign_positive() {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let realized = (price - position.avg_entry_price) * closing * direction;
        position.realized_pnl += realized;
        self.closed_trades.push(realized);
        position.quantity += delta;

        if position.quantity.is_zero() {
            position.avg_entry_price = Decimal::ZERO;
        } else if quantity > open_abs {
            // Crossed through zero: the remainder opens a fresh position at
            // the fill price.
            position.avg_entry_price = price;
        }

        realized
    }

    /// Sum of unrealized P&L across positions, marking each symbol with the
    /// given lookup.
    pub fn total_unrealized_pnl<F>(&self, mark: F) -> Decimal
    where
        F: Fn(&str) -> Option<Decimal>,
    {
        self.positions
            .values()
            .filter(|p| !p.quantity.is_zero())
            .map(|p| mark(&p.symbol).map(|m| p.unrealized_pnl(m)).unwrap_or(Decimal::ZERO))
            .sum()
    }
}
