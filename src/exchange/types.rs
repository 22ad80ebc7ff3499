//! Venue-neutral types exchanged between the gateway, workers and the
//! rotation controller.

use super::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "Limit",
            OrderType::Market => "Market",
        }
    }
}

/// Time in force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    #[serde(rename = "GTC")]
    Gtc,
    #[serde(rename = "IOC")]
    Ioc,
    /// Post only
    PostOnly,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::PostOnly => "PostOnly",
        }
    }
}

/// Which leg of a hedge-mode position an order or position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that opens or adds to this leg.
    pub fn entry_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces this leg.
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// Hedge-mode position index (1 = long, 2 = short).
    pub fn position_idx(self) -> u8 {
        match self {
            PositionSide::Long => 1,
            PositionSide::Short => 2,
        }
    }

    pub fn from_position_idx(idx: u8) -> Option<Self> {
        match idx {
            1 => Some(PositionSide::Long),
            2 => Some(PositionSide::Short),
            _ => None,
        }
    }
}

/// An open position row as reported by the exchange account.
#[derive(Debug, Clone, Serialize)]
pub struct OpenPosition {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealised_pnl: Decimal,
    pub cum_realised_pnl: Decimal,
    pub liq_price: Option<Decimal>,
}

/// One leg of a hedge-mode position.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionLeg {
    pub qty: Decimal,
    pub entry_price: Option<Decimal>,
    pub unrealised_pnl: Decimal,
    pub cum_realised_pnl: Decimal,
    pub liq_price: Option<Decimal>,
}

impl PositionLeg {
    pub fn is_open(&self) -> bool {
        self.qty > Decimal::ZERO
    }
}

/// Long and short legs for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HedgePosition {
    pub long: PositionLeg,
    pub short: PositionLeg,
}

impl HedgePosition {
    /// Assemble the hedge legs of `symbol` out of account position rows.
    pub fn from_rows<'a>(symbol: &Symbol, rows: impl IntoIterator<Item = &'a OpenPosition>) -> Self {
        let mut hedge = HedgePosition::default();
        for row in rows.into_iter().filter(|r| &r.symbol == symbol) {
            let leg = PositionLeg {
                qty: row.size,
                entry_price: (row.size > Decimal::ZERO).then_some(row.entry_price),
                unrealised_pnl: row.unrealised_pnl,
                cum_realised_pnl: row.cum_realised_pnl,
                liq_price: row.liq_price,
            };
            match row.side {
                PositionSide::Long => hedge.long = leg,
                PositionSide::Short => hedge.short = leg,
            }
        }
        hedge
    }

    pub fn leg(&self, side: PositionSide) -> &PositionLeg {
        match side {
            PositionSide::Long => &self.long,
            PositionSide::Short => &self.short,
        }
    }

    pub fn has_exposure(&self) -> bool {
        self.long.is_open() || self.short.is_open()
    }
}

/// Account equity summary in the quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Balance {
    pub total_equity: Decimal,
    pub available: Decimal,
}

/// Best bid/ask snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookTop {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl BookTop {
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }
}

/// Candle interval used by the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    OneMinute,
    FiveMinutes,
}

impl CandleInterval {
    /// Interval code in the exchange's kline API.
    pub fn code(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1",
            CandleInterval::FiveMinutes => "5",
        }
    }
}

/// OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Trading rules for an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstrumentRules {
    pub tick_size: Decimal,
    pub qty_step: Decimal,
    pub min_order_qty: Decimal,
    pub max_leverage: Decimal,
}

/// New order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
    pub position_side: PositionSide,
    pub reduce_only: bool,
}

impl NewOrder {
    /// Post-only limit order opening or adding to a leg.
    pub fn entry(symbol: &Symbol, leg: PositionSide, qty: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.clone(),
            side: leg.entry_side(),
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            time_in_force: Some(TimeInForce::PostOnly),
            position_side: leg,
            reduce_only: false,
        }
    }

    /// Reduce-only limit order taking profit on a leg.
    pub fn take_profit(symbol: &Symbol, leg: PositionSide, qty: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.clone(),
            side: leg.exit_side(),
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            position_side: leg,
            reduce_only: true,
        }
    }
}

/// Acknowledgement for a placed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub symbol: Symbol,
}

/// A resting order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub reduce_only: bool,
    pub position_side: Option<PositionSide>,
    pub created_at: DateTime<Utc>,
}

impl OpenOrder {
    /// Whether this order is a take-profit for the given leg.
    pub fn is_take_profit_for(&self, leg: PositionSide) -> bool {
        self.reduce_only && self.side == leg.exit_side() && self.position_side.map_or(true, |p| p == leg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(symbol: &str, side: PositionSide, size: Decimal, entry: Decimal) -> OpenPosition {
        OpenPosition {
            symbol: Symbol::new(symbol),
            side,
            size,
            entry_price: entry,
            unrealised_pnl: Decimal::ZERO,
            cum_realised_pnl: Decimal::ZERO,
            liq_price: None,
        }
    }

    #[test]
    fn test_hedge_position_from_rows() {
        let rows = vec![
            row("BTCUSDT", PositionSide::Long, dec!(0.5), dec!(50000)),
            row("BTC/USDT:USDT", PositionSide::Short, dec!(0.2), dec!(51000)),
            row("ETHUSDT", PositionSide::Long, dec!(3), dec!(3000)),
        ];

        let hedge = HedgePosition::from_rows(&Symbol::new("BTCUSDT"), &rows);
        assert_eq!(hedge.long.qty, dec!(0.5));
        assert_eq!(hedge.long.entry_price, Some(dec!(50000)));
        assert_eq!(hedge.short.qty, dec!(0.2));
        assert!(hedge.has_exposure());

        let empty = HedgePosition::from_rows(&Symbol::new("SOLUSDT"), &rows);
        assert!(!empty.has_exposure());
        assert_eq!(empty.long.entry_price, None);
    }

    #[test]
    fn test_leg_sides() {
        assert_eq!(PositionSide::Long.exit_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.entry_side(), OrderSide::Sell);
        assert_eq!(PositionSide::from_position_idx(2), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_position_idx(0), None);
    }

    #[test]
    fn test_take_profit_order_matching() {
        let symbol = Symbol::new("BTCUSDT");
        let tp = NewOrder::take_profit(&symbol, PositionSide::Long, dec!(1), dec!(100));
        assert_eq!(tp.side, OrderSide::Sell);
        assert!(tp.reduce_only);

        let resting = OpenOrder {
            order_id: "1".into(),
            symbol,
            side: OrderSide::Sell,
            price: dec!(100),
            qty: dec!(1),
            reduce_only: true,
            position_side: Some(PositionSide::Long),
            created_at: Utc::now(),
        };
        assert!(resting.is_take_profit_for(PositionSide::Long));
        assert!(!resting.is_take_profit_for(PositionSide::Short));
    }
}
