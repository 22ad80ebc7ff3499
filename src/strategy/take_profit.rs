//! Take-profit pricing and maintenance of the resting reduce-only order.

use crate::exchange::{NewOrder, OpenOrder, PositionLeg, PositionSide, Symbol};
use crate::utils::decimal::round_to_tick;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Take-profit price for a leg: the entry shifted by `spread` in the
/// profitable direction, rounded to the tick size.
pub fn take_profit_price(side: PositionSide, entry: Decimal, spread: Decimal, tick_size: Decimal) -> Decimal {
    let raw = match side {
        PositionSide::Long => entry + spread,
        PositionSide::Short => entry - spread,
    };
    round_to_tick(raw, tick_size)
}

/// What to do with a leg's take-profit order this iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum TpAction {
    Keep,
    Place(NewOrder),
    /// Cancel the listed orders, then place the new one
    Replace { cancel: Vec<String>, order: NewOrder },
    /// Cancel orders left over from a closed leg
    Cancel(Vec<String>),
}

/// Decide how to bring the resting take-profit for `side` in line with the
/// target price.
///
/// A missing order is placed at once; a drifted one is replaced only when
/// `refresh_due`, so the order keeps its queue position between refreshes.
pub fn plan_take_profit(
    symbol: &Symbol,
    side: PositionSide,
    leg: &PositionLeg,
    target: Option<Decimal>,
    resting: &[OpenOrder],
    refresh_due: bool,
) -> TpAction {
    let existing: Vec<&OpenOrder> = resting.iter().filter(|o| o.is_take_profit_for(side)).collect();
    let ids = || existing.iter().map(|o| o.order_id.clone()).collect::<Vec<_>>();

    let (true, Some(price)) = (leg.is_open(), target) else {
        return if existing.is_empty() || leg.is_open() {
            TpAction::Keep
        } else {
            TpAction::Cancel(ids())
        };
    };

    let order = NewOrder::take_profit(symbol, side, leg.qty, price);
    match existing.as_slice() {
        [] => TpAction::Place(order),
        [only] if only.price == price && only.qty == leg.qty => TpAction::Keep,
        [_] if !refresh_due => TpAction::Keep,
        _ => TpAction::Replace { cancel: ids(), order },
    }
}

/// Entry orders (not reduce-only) resting longer than `timeout`.
pub fn stale_entries<'a>(orders: &'a [OpenOrder], now: DateTime<Utc>, timeout: Duration) -> Vec<&'a OpenOrder> {
    orders
        .iter()
        .filter(|o| !o.reduce_only && now - o.created_at > timeout)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderSide;
    use rust_decimal_macros::dec;

    fn symbol() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    fn leg(qty: Decimal) -> PositionLeg {
        PositionLeg {
            qty,
            entry_price: (qty > Decimal::ZERO).then_some(dec!(100)),
            ..Default::default()
        }
    }

    fn resting_tp(id: &str, price: Decimal, qty: Decimal) -> OpenOrder {
        OpenOrder {
            order_id: id.into(),
            symbol: symbol(),
            side: OrderSide::Sell,
            price,
            qty,
            reduce_only: true,
            position_side: Some(PositionSide::Long),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_take_profit_price_rounds_to_tick() {
        assert_eq!(
            take_profit_price(PositionSide::Long, dec!(100), dec!(1.2345), dec!(0.01)),
            dec!(101.23)
        );
        assert_eq!(
            take_profit_price(PositionSide::Short, dec!(100), dec!(1.2355), dec!(0.01)),
            dec!(98.76)
        );
    }

    #[test]
    fn test_missing_take_profit_is_placed() {
        let action = plan_take_profit(&symbol(), PositionSide::Long, &leg(dec!(2)), Some(dec!(105)), &[], false);
        match action {
            TpAction::Place(order) => {
                assert_eq!(order.qty, dec!(2));
                assert_eq!(order.price, Some(dec!(105)));
                assert!(order.reduce_only);
            }
            other => panic!("expected Place, got {:?}", other),
        }
    }

    #[test]
    fn test_drifted_take_profit_waits_for_refresh() {
        let resting = vec![resting_tp("1", dec!(104), dec!(2))];
        let long = leg(dec!(2));

        let early = plan_take_profit(&symbol(), PositionSide::Long, &long, Some(dec!(105)), &resting, false);
        assert_eq!(early, TpAction::Keep);

        let due = plan_take_profit(&symbol(), PositionSide::Long, &long, Some(dec!(105)), &resting, true);
        assert!(matches!(due, TpAction::Replace { ref cancel, .. } if cancel == &vec!["1".to_string()]));
    }

    #[test]
    fn test_matching_take_profit_is_kept() {
        let resting = vec![resting_tp("1", dec!(105), dec!(2))];
        let action = plan_take_profit(&symbol(), PositionSide::Long, &leg(dec!(2)), Some(dec!(105)), &resting, true);
        assert_eq!(action, TpAction::Keep);
    }

    #[test]
    fn test_leftover_take_profit_on_flat_leg_is_cancelled() {
        let resting = vec![resting_tp("9", dec!(105), dec!(2))];
        let action = plan_take_profit(&symbol(), PositionSide::Long, &leg(Decimal::ZERO), None, &resting, false);
        assert_eq!(action, TpAction::Cancel(vec!["9".to_string()]));

        // Short leg ignores the long leg's order
        let action = plan_take_profit(&symbol(), PositionSide::Short, &leg(Decimal::ZERO), None, &resting, false);
        assert_eq!(action, TpAction::Keep);
    }

    #[test]
    fn test_stale_entries() {
        let now = Utc::now();
        let mut old_entry = resting_tp("old", dec!(99), dec!(1));
        old_entry.reduce_only = false;
        old_entry.created_at = now - Duration::seconds(120);
        let mut fresh_entry = old_entry.clone();
        fresh_entry.order_id = "fresh".into();
        fresh_entry.created_at = now;
        let mut old_tp = resting_tp("tp", dec!(105), dec!(1));
        old_tp.created_at = now - Duration::seconds(600);

        let orders = vec![old_entry, fresh_entry, old_tp];
        let stale = stale_entries(&orders, now, Duration::seconds(60));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].order_id, "old");
    }
}
