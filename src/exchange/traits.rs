//! Venue-agnostic exchange gateway.
//!
//! The rotation controller and the workers depend only on
//! [`ExchangeGateway`]; each venue provides one implementation:
//! - `BybitClient` for live linear perpetuals
//! - `PaperExchange` for dry runs and tests

use super::error::ExchangeError;
use super::types::*;
use super::Symbol;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Venue identifier selected once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Bybit,
    Paper,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Bybit => write!(f, "bybit"),
            Venue::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bybit" => Ok(Venue::Bybit),
            "paper" | "mock" => Ok(Venue::Paper),
            other => anyhow::bail!("unsupported exchange '{}' (expected bybit or paper)", other),
        }
    }
}

/// Operations the bot consumes from a derivatives venue.
///
/// Every method is a single request/response; retries belong to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn venue(&self) -> Venue;

    /// Account equity in the quote currency.
    async fn get_balance(&self, quote: &str) -> ExchangeResult<Balance>;

    /// Every non-empty position row on the account.
    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>>;

    /// Hedge legs for one symbol.
    async fn get_position(&self, symbol: &Symbol) -> ExchangeResult<HedgePosition>;

    async fn get_book_top(&self, symbol: &Symbol) -> ExchangeResult<BookTop>;

    /// Most recent candles, oldest first.
    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: CandleInterval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>>;

    async fn get_instrument_rules(&self, symbol: &Symbol) -> ExchangeResult<InstrumentRules>;

    async fn set_leverage(&self, symbol: &Symbol, leverage: rust_decimal::Decimal) -> ExchangeResult<()>;

    async fn get_open_orders(&self, symbol: &Symbol) -> ExchangeResult<Vec<OpenOrder>>;

    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderAck>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExchangeResult<()>;
}
