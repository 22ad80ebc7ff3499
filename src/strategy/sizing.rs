//! Order sizing from equity and instrument rules.

use crate::exchange::InstrumentRules;
use crate::utils::decimal::{round_down_to_lot, safe_div};
use rust_decimal::Decimal;
use serde::Serialize;

/// Quantities one worker trades with on the current iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionSizing {
    /// Size of one entry or add
    pub entry_qty: Decimal,
    /// Largest size a single leg may reach
    pub max_leg_qty: Decimal,
}

impl PositionSizing {
    /// Entry qty is `equity * wallet_exposure / best_ask` rounded down to the
    /// qty step and floored at the exchange minimum; a leg may grow to
    /// `leverage` entries.
    pub fn compute(
        equity: Decimal,
        wallet_exposure: Decimal,
        best_ask: Decimal,
        rules: &InstrumentRules,
        leverage: Decimal,
    ) -> Self {
        let raw = safe_div(equity * wallet_exposure, best_ask);
        let entry_qty = round_down_to_lot(raw, rules.qty_step).max(rules.min_order_qty);
        let max_leg_qty = round_down_to_lot(entry_qty * leverage.max(Decimal::ONE), rules.qty_step);

        Self {
            entry_qty,
            max_leg_qty,
        }
    }

    /// Whether adding one more entry keeps a leg within its cap.
    pub fn room_for_add(&self, current_qty: Decimal) -> bool {
        current_qty + self.entry_qty <= self.max_leg_qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rules() -> InstrumentRules {
        InstrumentRules {
            tick_size: dec!(0.01),
            qty_step: dec!(0.1),
            min_order_qty: dec!(0.1),
            max_leverage: dec!(25),
        }
    }

    #[test]
    fn test_entry_rounded_down_to_step() {
        // 10000 * 0.01 / 30 = 3.333..
        let sizing = PositionSizing::compute(dec!(10000), dec!(0.01), dec!(30), &rules(), dec!(5));
        assert_eq!(sizing.entry_qty, dec!(3.3));
        assert_eq!(sizing.max_leg_qty, dec!(16.5));
    }

    #[test]
    fn test_entry_floored_at_min_qty() {
        let sizing = PositionSizing::compute(dec!(10), dec!(0.001), dec!(30), &rules(), dec!(10));
        assert_eq!(sizing.entry_qty, dec!(0.1));
        assert_eq!(sizing.max_leg_qty, dec!(1));
    }

    #[test]
    fn test_room_for_add() {
        let sizing = PositionSizing {
            entry_qty: dec!(1),
            max_leg_qty: dec!(3),
        };
        assert!(sizing.room_for_add(dec!(2)));
        assert!(!sizing.room_for_add(dec!(2.5)));
    }
}
