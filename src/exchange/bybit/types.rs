//! Type definitions for Bybit v5 REST responses.
//!
//! Bybit encodes every number as a string and uses empty strings for
//! "not applicable", so numeric fields are kept raw here and parsed by the
//! client, which can then skip a bad row instead of failing the whole call.

use serde::{Deserialize, Serialize};

/// Common response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Paginated list result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub list: Vec<T>,
    #[serde(default)]
    pub next_page_cursor: Option<String>,
}

/// Position row from `/v5/position/list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    #[serde(default)]
    pub symbol: String,
    /// "Buy", "Sell", or empty/"None" for a flat one-way slot
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub position_idx: u8,
    #[serde(default)]
    pub unrealised_pnl: String,
    #[serde(default)]
    pub cum_realised_pnl: String,
    #[serde(default)]
    pub liq_price: String,
}

/// Account row from `/v5/account/wallet-balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWalletAccount {
    #[serde(default)]
    pub total_equity: String,
    #[serde(default)]
    pub total_available_balance: String,
    #[serde(default)]
    pub coin: Vec<RawWalletCoin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWalletCoin {
    pub coin: String,
    #[serde(default)]
    pub equity: String,
    #[serde(default)]
    pub available_to_withdraw: String,
}

/// Result of `/v5/market/orderbook`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOrderbook {
    #[serde(rename = "s")]
    pub symbol: String,
    /// Bids as `[price, size]`, best first
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    /// Asks as `[price, size]`, best first
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Result of `/v5/market/kline`; rows are
/// `[startTime, open, high, low, close, volume, turnover]`, newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKlines {
    pub list: Vec<Vec<String>>,
}

/// Instrument row from `/v5/market/instruments-info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInstrument {
    pub symbol: String,
    pub price_filter: RawPriceFilter,
    pub lot_size_filter: RawLotSizeFilter,
    pub leverage_filter: RawLeverageFilter,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPriceFilter {
    pub tick_size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLotSizeFilter {
    pub qty_step: String,
    pub min_order_qty: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeverageFilter {
    pub max_leverage: String,
}

/// Order row from `/v5/order/realtime`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub position_idx: u8,
    #[serde(default)]
    pub created_time: String,
}

/// Result of `/v5/order/create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderAck {
    pub order_id: String,
}

/// Body for `/v5/order/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody<'a> {
    pub category: &'static str,
    pub symbol: &'a str,
    pub side: &'static str,
    pub order_type: &'static str,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<&'static str>,
    pub position_idx: u8,
    pub reduce_only: bool,
}

/// Body for `/v5/order/cancel`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderBody<'a> {
    pub category: &'static str,
    pub symbol: &'a str,
    pub order_id: &'a str,
}

/// Body for `/v5/position/set-leverage`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeverageBody<'a> {
    pub category: &'static str,
    pub symbol: &'a str,
    pub buy_leverage: String,
    pub sell_leverage: String,
}
