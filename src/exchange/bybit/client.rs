//! Bybit v5 REST API client.

use super::types::*;
use crate::config::ExchangeAccount;
use crate::exchange::{
    Balance, BookTop, Candle, CandleInterval, ExchangeError, ExchangeGateway, ExchangeResult,
    HedgePosition, InstrumentRules, NewOrder, OpenOrder, OpenPosition, OrderAck, OrderSide,
    PositionSide, Symbol, Venue,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";
const CATEGORY: &str = "linear";
const SETTLE_COIN: &str = "USDT";
/// Returned by set-leverage when the requested leverage is already active.
const LEVERAGE_NOT_MODIFIED: i64 = 110043;

/// Bybit client for linear perpetuals.
pub struct BybitClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl BybitClient {
    /// Create a new client from an account entry.
    pub fn new(account: &ExchangeAccount) -> Result<Self> {
        let base_url = match &account.base_url {
            Some(url) => url.clone(),
            None if account.testnet => TESTNET_URL.to_string(),
            None => MAINNET_URL.to_string(),
        };
        Self::with_base_url(&account.api_key, &account.api_secret, &base_url)
    }

    /// Create a client against a custom base URL.
    pub fn with_base_url(api_key: &str, secret_key: &str, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// HMAC-SHA256 over `timestamp + api_key + recv_window + payload`.
    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string()
    }

    fn query_string(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn auth_headers(&self, request: reqwest::RequestBuilder, payload: &str) -> reqwest::RequestBuilder {
        let timestamp = Self::timestamp();
        let signature = self.sign(&timestamp, payload);
        request
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> ExchangeResult<T> {
        let query = Self::query_string(params);
        let url = format!("{}{}?{}", self.base_url, path, query);
        let mut request = self.http.get(&url);
        if signed {
            request = self.auth_headers(request, &query);
        }
        let response = request.send().await?;
        Self::unwrap_envelope(path, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ExchangeResult<T> {
        let payload = serde_json::to_string(body).map_err(|e| ExchangeError::Malformed {
            what: "request body",
            detail: e.to_string(),
        })?;
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        let response = self
            .auth_headers(request, &payload)
            .body(payload)
            .send()
            .await?;
        Self::unwrap_envelope(path, response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Transport(format!("{} returned {}: {}", path, status, body)));
        }

        let envelope: Envelope = response.json().await?;
        if envelope.ret_code != 0 {
            return Err(ExchangeError::Api {
                endpoint: path.to_string(),
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }

        serde_json::from_value(envelope.result).map_err(|e| ExchangeError::Malformed {
            what: "response result",
            detail: format!("{}: {}", path, e),
        })
    }

    async fn fetch_positions(&self, symbol: Option<&Symbol>) -> ExchangeResult<Vec<OpenPosition>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("category", CATEGORY.to_string()), ("limit", "200".to_string())];
            match symbol {
                Some(symbol) => params.push(("symbol", symbol.to_string())),
                None => params.push(("settleCoin", SETTLE_COIN.to_string())),
            }
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let page: ListResult<RawPosition> = self.get("/v5/position/list", &params, true).await?;
            rows.extend(page.list.iter().filter_map(parse_position));

            match page.next_page_cursor.filter(|c| !c.is_empty()) {
                Some(next) if symbol.is_none() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(rows)
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw).ok()
}

fn require_decimal(what: &'static str, raw: &str) -> ExchangeResult<Decimal> {
    parse_decimal(raw).ok_or_else(|| ExchangeError::Malformed {
        what,
        detail: format!("unparsable value {:?}", raw),
    })
}

fn parse_side(raw: &str) -> Option<OrderSide> {
    match raw {
        "Buy" => Some(OrderSide::Buy),
        "Sell" => Some(OrderSide::Sell),
        _ => None,
    }
}

/// Convert a raw position row, skipping flat or inconsistent rows.
fn parse_position(raw: &RawPosition) -> Option<OpenPosition> {
    let symbol = Symbol::new(&raw.symbol);
    if symbol.is_empty() {
        warn!(?raw, "Position row without symbol, skipping");
        return None;
    }

    let Some(size) = parse_decimal(&raw.size) else {
        warn!(%symbol, size = %raw.size, "Position row with unparsable size, skipping");
        return None;
    };
    if size.is_zero() {
        return None;
    }

    let side = match PositionSide::from_position_idx(raw.position_idx) {
        Some(side) => side,
        // One-way mode slot: infer the leg from the side field
        None => match parse_side(&raw.side) {
            Some(OrderSide::Buy) => PositionSide::Long,
            Some(OrderSide::Sell) => PositionSide::Short,
            None => {
                warn!(%symbol, side = %raw.side, "Position row with unknown side, skipping");
                return None;
            }
        },
    };

    Some(OpenPosition {
        symbol,
        side,
        size: size.abs(),
        entry_price: parse_decimal(&raw.avg_price).unwrap_or_default(),
        unrealised_pnl: parse_decimal(&raw.unrealised_pnl).unwrap_or_default(),
        cum_realised_pnl: parse_decimal(&raw.cum_realised_pnl).unwrap_or_default(),
        liq_price: parse_decimal(&raw.liq_price),
    })
}

fn parse_candle(row: &[String]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    Some(Candle {
        open_time: row[0].parse().ok()?,
        open: parse_decimal(&row[1])?,
        high: parse_decimal(&row[2])?,
        low: parse_decimal(&row[3])?,
        close: parse_decimal(&row[4])?,
        volume: parse_decimal(&row[5])?,
    })
}

fn parse_order(raw: &RawOrder) -> Option<OpenOrder> {
    let created_ms: i64 = raw.created_time.parse().unwrap_or_default();
    Some(OpenOrder {
        order_id: raw.order_id.clone(),
        symbol: Symbol::new(&raw.symbol),
        side: parse_side(&raw.side)?,
        price: parse_decimal(&raw.price).unwrap_or_default(),
        qty: parse_decimal(&raw.qty)?,
        reduce_only: raw.reduce_only,
        position_side: PositionSide::from_position_idx(raw.position_idx),
        created_at: Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl ExchangeGateway for BybitClient {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    #[instrument(skip(self))]
    async fn get_balance(&self, quote: &str) -> ExchangeResult<Balance> {
        let params = [("accountType", "UNIFIED".to_string()), ("coin", quote.to_string())];
        let result: ListResult<RawWalletAccount> =
            self.get("/v5/account/wallet-balance", &params, true).await?;

        let account = result.list.first().ok_or(ExchangeError::Malformed {
            what: "wallet balance",
            detail: "empty account list".to_string(),
        })?;

        // Unified accounts report totals; fall back to the coin row otherwise
        let coin = account.coin.iter().find(|c| c.coin == quote);
        let total_equity = parse_decimal(&account.total_equity)
            .or_else(|| coin.and_then(|c| parse_decimal(&c.equity)))
            .ok_or(ExchangeError::Malformed {
                what: "wallet balance",
                detail: format!("no equity for {}", quote),
            })?;
        let available = parse_decimal(&account.total_available_balance)
            .or_else(|| coin.and_then(|c| parse_decimal(&c.available_to_withdraw)))
            .unwrap_or(total_equity);

        Ok(Balance {
            total_equity,
            available,
        })
    }

    #[instrument(skip(self))]
    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>> {
        let positions = self.fetch_positions(None).await?;
        debug!(count = positions.len(), "Fetched open positions");
        Ok(positions)
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_position(&self, symbol: &Symbol) -> ExchangeResult<HedgePosition> {
        let rows = self.fetch_positions(Some(symbol)).await?;
        Ok(HedgePosition::from_rows(symbol, &rows))
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_book_top(&self, symbol: &Symbol) -> ExchangeResult<BookTop> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", symbol.to_string()),
            ("limit", "1".to_string()),
        ];
        let book: RawOrderbook = self.get("/v5/market/orderbook", &params, false).await?;

        let best_bid = book.bids.first().map(|[price, _]| price.as_str()).unwrap_or_default();
        let best_ask = book.asks.first().map(|[price, _]| price.as_str()).unwrap_or_default();
        Ok(BookTop {
            best_bid: require_decimal("best bid", best_bid)?,
            best_ask: require_decimal("best ask", best_ask)?,
        })
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: CandleInterval,
        limit: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", symbol.to_string()),
            ("interval", interval.code().to_string()),
            ("limit", limit.to_string()),
        ];
        let klines: RawKlines = self.get("/v5/market/kline", &params, false).await?;

        let mut candles: Vec<Candle> = klines.list.iter().filter_map(|row| parse_candle(row)).collect();
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_instrument_rules(&self, symbol: &Symbol) -> ExchangeResult<InstrumentRules> {
        let params = [("category", CATEGORY.to_string()), ("symbol", symbol.to_string())];
        let result: ListResult<RawInstrument> =
            self.get("/v5/market/instruments-info", &params, false).await?;

        let instrument = result
            .list
            .into_iter()
            .find(|i| Symbol::new(&i.symbol) == *symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        Ok(InstrumentRules {
            tick_size: require_decimal("tick size", &instrument.price_filter.tick_size)?,
            qty_step: require_decimal("qty step", &instrument.lot_size_filter.qty_step)?,
            min_order_qty: require_decimal("min order qty", &instrument.lot_size_filter.min_order_qty)?,
            max_leverage: require_decimal("max leverage", &instrument.leverage_filter.max_leverage)?,
        })
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn set_leverage(&self, symbol: &Symbol, leverage: Decimal) -> ExchangeResult<()> {
        let body = SetLeverageBody {
            category: CATEGORY,
            symbol: symbol.as_str(),
            buy_leverage: leverage.normalize().to_string(),
            sell_leverage: leverage.normalize().to_string(),
        };
        match self
            .post::<_, serde_json::Value>("/v5/position/set-leverage", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(ExchangeError::Api { code, .. }) if code == LEVERAGE_NOT_MODIFIED => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn get_open_orders(&self, symbol: &Symbol) -> ExchangeResult<Vec<OpenOrder>> {
        let params = [
            ("category", CATEGORY.to_string()),
            ("symbol", symbol.to_string()),
            ("openOnly", "0".to_string()),
        ];
        let result: ListResult<RawOrder> = self.get("/v5/order/realtime", &params, true).await?;
        Ok(result.list.iter().filter_map(parse_order).collect())
    }

    #[instrument(skip(self), fields(symbol = %order.symbol))]
    async fn place_order(&self, order: &NewOrder) -> ExchangeResult<OrderAck> {
        let body = CreateOrderBody {
            category: CATEGORY,
            symbol: order.symbol.as_str(),
            side: order.side.as_str(),
            order_type: order.order_type.as_str(),
            qty: order.qty.normalize().to_string(),
            price: order.price.map(|p| p.normalize().to_string()),
            time_in_force: order.time_in_force.map(|t| t.as_str()),
            position_idx: order.position_side.position_idx(),
            reduce_only: order.reduce_only,
        };

        debug!(?body, "Placing order");
        let ack: RawOrderAck = self.post("/v5/order/create", &body).await?;
        Ok(OrderAck {
            order_id: ack.order_id,
            symbol: order.symbol.clone(),
        })
    }

    #[instrument(skip(self), fields(symbol = %symbol))]
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> ExchangeResult<()> {
        let body = CancelOrderBody {
            category: CATEGORY,
            symbol: symbol.as_str(),
            order_id,
        };
        self.post::<_, serde_json::Value>("/v5/order/cancel", &body)
            .await
            .map(|_| ())
    }
}
