//! Paper venue for dry runs and tests.
//!
//! Balances, hedge legs and resting orders live in memory. Market data is
//! either injected through the setters or pulled from a live gateway's
//! public endpoints. Resting limit orders fill when the book crosses them.

use super::error::ExchangeError;
use super::traits::{ExchangeGateway, ExchangeResult, Venue};
use super::types::*;
use super::Symbol;
use crate::utils::decimal::weighted_average;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Rejection code for a post-only order that would take liquidity.
const POST_ONLY_REJECTED: i64 = 170_218;
/// Rejection code for a reduce-only order without a matching leg.
const REDUCE_ONLY_REJECTED: i64 = 110_017;

/// Simulated account state.
#[derive(Debug)]
pub struct PaperState {
    pub initial_balance: Decimal,
    /// Cash balance including realised PnL and fees
    pub balance: Decimal,
    pub positions: HashMap<Symbol, HedgePosition>,
    pub orders: HashMap<String, OpenOrder>,
    pub leverage: HashMap<Symbol, Decimal>,
    pub total_fees: Decimal,
    pub fill_count: u64,
}

impl PaperState {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            balance: initial_balance,
            positions: HashMap::new(),
            orders: HashMap::new(),
            leverage: HashMap::new(),
            total_fees: Decimal::ZERO,
            fill_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MarketData {
    books: HashMap<Symbol, BookTop>,
    candles: HashMap<(Symbol, CandleInterval), Vec<Candle>>,
    rules: HashMap<Symbol, InstrumentRules>,
}

/// In-process simulated venue.
pub struct PaperExchange {
    state: Arc<RwLock<PaperState>>,
    market: Arc<RwLock<MarketData>>,
    /// Live venue used for public market data, if any
    feed: Option<Arc<dyn ExchangeGateway>>,
    order_id_counter: AtomicU64,
    positions_unavailable: AtomicBool,
    /// Maker fee rate (0.02%)
    fee_rate: Decimal,
}

impl PaperExchange {
    /// Create a paper venue with only injected market data.
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState::new(initial_balance))),
            market: Arc::new(RwLock::new(MarketData::default())),
            feed: None,
            order_id_counter: AtomicU64::new(1),
            positions_unavailable: AtomicBool::new(false),
            fee_rate: dec!(0.0002),
        }
    }

    /// Create a paper venue that reads market data from a live gateway.
    pub fn with_market_feed(initial_balance: Decimal, feed: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new(initial_balance)
        }
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Set the top of book and fill any resting orders it crosses.
    pub async fn set_book_top(&self, symbol: &Symbol, best_bid: Decimal, best_ask: Decimal) {
        let top = BookTop { best_bid, best_ask };
        self.market.write().await.books.insert(symbol.clone(), top);
        self.match_resting(symbol, top).await;
    }

    pub async fn set_candles(&self, symbol: &Symbol, interval: CandleInterval, candles: Vec<Candle>) {
        self.market
            .write()
            .await
            .candles
            .insert((symbol.clone(), interval), candles);
    }

    pub async fn set_instrument_rules(&self, symbol: &Symbol, rules: InstrumentRules) {
        self.market.write().await.rules.insert(symbol.clone(), rules);
    }

    /// Overwrite one leg of a symbol's position.
    pub async fn set_position(&self, symbol: &Symbol, side: PositionSide, qty: Decimal, entry_price: Decimal) {
        let mut state = self.state.write().await;
        let hedge = state.positions.entry(symbol.clone()).or_default();
        let leg = leg_mut(hedge, side);
        leg.qty = qty;
        leg.entry_price = (qty > Decimal::ZERO).then_some(entry_price);
    }

    /// Make `get_open_positions` fail until switched back.
    pub fn set_positions_unavailable(&self, unavailable: bool) {
        self.positions_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of the simulated account.
    pub async fn get_state(&self) -> PaperState {
        let state = self.state.read().await;
        PaperState {
            initial_balance: state.initial_balance,
            balance: state.balance,
            positions: state.positions.clone(),
            orders: state.orders.clone(),
            leverage: state.leverage.clone(),
            total_fees: state.total_fees,
            fill_count: state.fill_count,
        }
    }

    async fn book_top(&self, symbol: &Symbol) -> ExchangeResult<BookTop> {
        if let Some(feed) = &self.feed {
            let top = feed.get_book_top(symbol).await?;
            self.market.write().await.books.insert(symbol.clone(), top);
            self.match_resting(symbol, top).await;
            return Ok(top);
        }

        self.market
            .read()
            .await
            .books
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn match_resting(&self, symbol: &Symbol, top: BookTop) {
        let mut state = self.state.write().await;

        let crossed: Vec<OpenOrder> = state
            .orders
            .values()
            .filter(|o| &o.symbol == symbol)
            .filter(|o| match o.side {
                OrderSide::Buy => top.best_ask <= o.price,
                OrderSide::Sell => top.best_bid >= o.price,
            })
            .cloned()
            .collect();

        for order in crossed {
            state.orders.remove(&order.order_id);
            let Some(leg) = order.position_side else {
                continue;
            };
            self.apply_fill(&mut state, symbol, leg, order.reduce_only, order.qty, order.price);
            debug!(
                order_id = %order.order_id,
                %symbol,
                side = ?order.side,
                qty = %order.qty,
                price = %order.price,
                "Paper order filled"
            );
        }
    }

    fn apply_fill(
        &self,
        state: &mut PaperState,
        symbol: &Symbol,
        side: PositionSide,
        reduce_only: bool,
        qty: Decimal,
        price: Decimal,
    ) {
        let fee = qty * price * self.fee_rate;
        let hedge = state.positions.entry(symbol.clone()).or_default();
        let leg = leg_mut(hedge, side);

        let mut realised = Decimal::ZERO;
        if reduce_only {
            let closed = qty.min(leg.qty);
            let entry = leg.entry_price.unwrap_or(price);
            realised = match side {
                PositionSide::Long => (price - entry) * closed,
                PositionSide::Short => (entry - price) * closed,
            };
            leg.qty -= closed;
            leg.cum_realised_pnl += realised;
            if leg.qty.is_zero() {
                leg.entry_price = None;
                leg.unrealised_pnl = Decimal::ZERO;
            }
        } else {
            let avg = match leg.entry_price {
                Some(entry) if leg.is_open() => weighted_average(&[(entry, leg.qty), (price, qty)]),
                _ => price,
            };
            leg.qty += qty;
            leg.entry_price = Some(avg);
        }

        state.balance += realised - fee;
        state.total_fees += fee;
        state.fill_count += 1;
    }

    async fn unrealised(&self, symbol: &Symbol, hedge: &HedgePosition) -> (Decimal, Decimal) {
        let Some(mid) = self.market.read().await.books.get(symbol).map(BookTop::mid) else {
            return (Decimal::ZERO, Decimal::ZERO);
        };
        let long = hedge
            .long
            .entry_price
            .map_or(Decimal::ZERO, |e| (mid - e) * hedge.long.qty);
        let short = hedge
            .short
            .entry_price
            .map_or(Decimal::ZERO, |e| (e - mid) * hedge.short.qty);
        (long, short)
    }
}

fn leg_mut(hedge: &mut HedgePosition, side: PositionSide) -> &mut PositionLeg {
    match side {
        PositionSide::Long => &mut hedge.long,
        PositionSide::Short => &mut hedge.short,
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn venue(&self) -> Venue {
        Venue::Paper
    }

    async fn get_balance(&self, _quote: &str) -> ExchangeResult<Balance> {
        let positions = self.state.read().await.positions.clone();
        let mut unrealised = Decimal::ZERO;
        for (symbol, hedge) in &positions {
            let (long, short) = self.unrealised(symbol, hedge).await;
            unrealised += long + short;
        }

        let balance = self.state.read().await.balance;
        Ok(Balance {
            total_equity: balance + unrealised,
            available: balance,
        })
    }

    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>> {
        if self.positions_unavailable.load(Ordering::SeqCst) {
            return Err(ExchangeError::Transport("paper venue: positions unavailable".into()));
        }

        let positions = self.state.read().await.positions.clone();
        let mut rows = Vec::new();
        for (symbol, hedge) in &positions {
            let (long_pnl, short_pnl) = self.unrealised(symbol, hedge).await;
            for (side, leg, pnl) in [
                (PositionSide::Long, &hedge.long, long_pnl),
                (PositionSide::Short, &hedge.short, short_pnl),
            ] {
                if leg.is_open() {
                    rows.push(OpenPosition {
                        symbol: symbol.clone(),
                        side,
                        size: leg.qty,
                        entry_price: leg.entry_price.unwrap_or_default(),
                        unrealised_pnl: pnl,
                        cum_realised_pnl: leg.cum_realised_pnl,
                        liq_price: None,
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn get_position(&self, symbol: &Symbol) -> ExchangeResult<HedgePosition> {
        let mut hedge = self
            .state
            .read()
            .await
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_default();
        let (long, short) = self.unrealised(symbol, &hedge).await;
        hedge.long.unrealised_pnl = long;
        hedge.short.unrealised_pnl = short;
        Ok(hedge)
    }

    async fn get_book_top(&self, symbol: &Symbol) -> ExchangeResult<BookTop> {
        self.book_top(symbol).await
    }

    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: CandleInterval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        if let Some(feed) = &self.feed {
            return feed.get_candles(symbol, interval, limit).await;
        }

        let market = self.market.read().await;
        let candles = market
            .candles
            .get(&(symbol.clone(), interval))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        let skip = candles.len().saturating_sub(limit);
        Ok(candles[skip..].to_vec())
    }

    async fn get_instrument_rules(&self, symbol: &Symbol) -> ExchangeResult<InstrumentRules> {
        if let Some(feed) = &self.feed {
            return feed.get_instrument_rules(symbol).await;
        }

        self.market
            .read()
            .await
            .rules
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: Decimal) -> ExchangeResult<()> {
        self.state.write().await.leverage.insert(symbol.clone(), leverage);
        Ok(())
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> ExchangeResult<Vec<OpenOrder>> {
        let mut orders: Vec<OpenOrder> = self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderAck> {
        let top = self.book_top(&order.symbol).await?;
        let mut state = self.state.write().await;

        if order.reduce_only {
            let open = state
                .positions
                .get(&order.symbol)
                .map_or(false, |h| h.leg(order.position_side).is_open());
            if !open {
                return Err(ExchangeError::Api {
                    endpoint: "paper/order".into(),
                    code: REDUCE_ONLY_REJECTED,
                    message: "reduce-only order has no position to reduce".into(),
                });
            }
        }

        let order_id = self.next_order_id();
        let crosses = |price: Decimal| match order.side {
            OrderSide::Buy => top.best_ask <= price,
            OrderSide::Sell => top.best_bid >= price,
        };

        let touch = match order.side {
            OrderSide::Buy => top.best_ask,
            OrderSide::Sell => top.best_bid,
        };

        match (order.order_type, order.price) {
            (OrderType::Market, _) => {
                self.apply_fill(&mut state, &order.symbol, order.position_side, order.reduce_only, order.qty, touch);
            }
            (OrderType::Limit, Some(price)) if crosses(price) => {
                if order.time_in_force == Some(TimeInForce::PostOnly) {
                    return Err(ExchangeError::Api {
                        endpoint: "paper/order".into(),
                        code: POST_ONLY_REJECTED,
                        message: "post-only order would take liquidity".into(),
                    });
                }
                self.apply_fill(&mut state, &order.symbol, order.position_side, order.reduce_only, order.qty, touch);
            }
            (OrderType::Limit, Some(price)) => {
                state.orders.insert(
                    order_id.clone(),
                    OpenOrder {
                        order_id: order_id.clone(),
                        symbol: order.symbol.clone(),
                        side: order.side,
                        price,
                        qty: order.qty,
                        reduce_only: order.reduce_only,
                        position_side: Some(order.position_side),
                        created_at: Utc::now(),
                    },
                );
            }
            (OrderType::Limit, None) => {
                return Err(ExchangeError::Malformed {
                    what: "order",
                    detail: "limit order without price".into(),
                });
            }
        }

        info!(
            %order_id,
            symbol = %order.symbol,
            side = ?order.side,
            qty = %order.qty,
            price = ?order.price,
            reduce_only = order.reduce_only,
            "Paper order accepted"
        );

        Ok(OrderAck {
            order_id,
            symbol: order.symbol.clone(),
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExchangeResult<()> {
        let mut state = self.state.write().await;
        match state.orders.get(order_id) {
            Some(order) if &order.symbol == symbol => {
                state.orders.remove(order_id);
                Ok(())
            }
            _ => Err(ExchangeError::Api {
                endpoint: "paper/cancel".into(),
                code: 110_001,
                message: format!("order {} does not exist", order_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn venue_with_book(bid: Decimal, ask: Decimal) -> (PaperExchange, Symbol) {
        let venue = PaperExchange::new(dec!(10000));
        let symbol = Symbol::new("BTCUSDT");
        venue.set_book_top(&symbol, bid, ask).await;
        (venue, symbol)
    }

    #[tokio::test]
    async fn test_resting_entry_fills_when_book_crosses() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;

        let order = NewOrder::entry(&symbol, PositionSide::Long, dec!(2), dec!(99));
        venue.place_order(&order).await.unwrap();
        assert_eq!(venue.get_open_orders(&symbol).await.unwrap().len(), 1);
        assert!(!venue.get_position(&symbol).await.unwrap().has_exposure());

        venue.set_book_top(&symbol, dec!(98), dec!(99)).await;

        let hedge = venue.get_position(&symbol).await.unwrap();
        assert_eq!(hedge.long.qty, dec!(2));
        assert_eq!(hedge.long.entry_price, Some(dec!(99)));
        assert!(venue.get_open_orders(&symbol).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_only_crossing_is_rejected() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;

        let order = NewOrder::entry(&symbol, PositionSide::Long, dec!(1), dec!(102));
        let err = venue.place_order(&order).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Api { code: POST_ONLY_REJECTED, .. }));
    }

    #[tokio::test]
    async fn test_take_profit_realises_pnl() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;
        venue.set_position(&symbol, PositionSide::Long, dec!(1), dec!(90)).await;

        let tp = NewOrder::take_profit(&symbol, PositionSide::Long, dec!(1), dec!(110));
        venue.place_order(&tp).await.unwrap();
        venue.set_book_top(&symbol, dec!(110), dec!(111)).await;

        let state = venue.get_state().await;
        assert!(!state.positions[&symbol].long.is_open());
        // 20 profit minus 110 * 0.0002 fee
        assert_eq!(state.balance, dec!(10000) + dec!(20) - dec!(0.022));
    }

    #[tokio::test]
    async fn test_reduce_only_without_leg_is_rejected() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;

        let tp = NewOrder::take_profit(&symbol, PositionSide::Short, dec!(1), dec!(90));
        assert!(venue.place_order(&tp).await.is_err());
    }

    #[tokio::test]
    async fn test_open_positions_and_failure_injection() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;
        venue.set_position(&symbol, PositionSide::Short, dec!(3), dec!(102)).await;

        let rows = venue.get_open_positions().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].side, PositionSide::Short);
        assert_eq!(rows[0].unrealised_pnl, dec!(4.5));

        venue.set_positions_unavailable(true);
        assert!(venue.get_open_positions().await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_fails() {
        let (venue, symbol) = venue_with_book(dec!(100), dec!(101)).await;
        assert!(venue.cancel_order(&symbol, "nope").await.is_err());

        let ack = venue
            .place_order(&NewOrder::entry(&symbol, PositionSide::Long, dec!(1), dec!(95)))
            .await
            .unwrap();
        tokio_test::assert_ok!(venue.cancel_order(&symbol, &ack.order_id).await);
    }
}
