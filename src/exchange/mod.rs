//! Exchange integrations for the symbol rotator.
//!
//! ## Bybit
//! REST v5 connectivity for linear perpetuals in hedge mode:
//! - Market data (order book, klines, instrument rules)
//! - Account operations (balance, positions, orders, leverage)
//!
//! ## Paper
//! Simulated venue with in-memory fills, optionally fed by Bybit's public
//! market data.

pub mod bybit;
mod error;
pub mod mock;
mod retry;
mod symbol;
mod traits;
mod types;

pub use bybit::BybitClient;
pub use error::ExchangeError;
pub use mock::PaperExchange;
pub use retry::RetryPolicy;
pub use symbol::{normalize, Symbol};
pub use traits::*;
pub use types::*;

use crate::config::ExchangeAccount;
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Build the gateway for a configured account.
///
/// With `paper_balance` set, orders are simulated and only public market
/// data is read from the venue.
pub fn connect(account: &ExchangeAccount, paper_balance: Option<Decimal>) -> Result<Arc<dyn ExchangeGateway>> {
    let venue: Venue = account.name.parse()?;

    let gateway: Arc<dyn ExchangeGateway> = match (venue, paper_balance) {
        (Venue::Bybit, None) => Arc::new(BybitClient::new(account)?),
        (Venue::Bybit, Some(balance)) => {
            let feed: Arc<dyn ExchangeGateway> = Arc::new(BybitClient::new(account)?);
            Arc::new(PaperExchange::with_market_feed(balance, feed))
        }
        (Venue::Paper, balance) => Arc::new(PaperExchange::new(balance.unwrap_or(Decimal::new(10000, 0)))),
    };

    info!(
        venue = %gateway.venue(),
        account = %account.account_name,
        testnet = account.testnet,
        "Exchange gateway ready"
    );
    Ok(gateway)
}
