//! Per-symbol trading workers.
//!
//! A worker is one tokio task looping over a single symbol: read market and
//! account state, decide entries, keep take-profits in place, publish a
//! dashboard row, then sleep until the next iteration or a stop signal.

mod handle;
#[cfg(test)]
pub(crate) mod testing;

pub use handle::{ExitOutcome, WorkerHandle};

use crate::candidates::{CandidateFilter, CandidateSource};
use crate::config::Config;
use crate::exchange::{
    CandleInterval, ExchangeError, ExchangeGateway, ExchangeResult, HedgePosition,
    InstrumentRules, NewOrder, OpenOrder, PositionSide, RetryPolicy, Symbol,
};
use crate::persistence::{DashboardStore, Journal, SymbolSnapshot};
use crate::strategy::{
    plan_take_profit, stale_entries, take_profit_price, EntryContext, EntryIntent, EntryReason,
    EntryRules, MovingAverages, PositionSizing, StrategyKind, TpAction,
};
use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Candles fetched per interval for the moving averages.
const CANDLE_LIMIT: usize = 12;
const QUOTE: &str = "USDT";

/// Why a worker task returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop signal received
    Stopped,
    /// Symbol left the rotator set or the allow/deny lists while flat
    Ineligible,
    /// Unrecoverable error
    Failed(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Stopped => write!(f, "stopped"),
            WorkerExit::Ineligible => write!(f, "ineligible"),
            WorkerExit::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{call} failed for {symbol}")]
    Exchange {
        symbol: Symbol,
        call: &'static str,
        #[source]
        source: ExchangeError,
    },
}

/// Starts worker tasks. The controller only ever launches through this.
pub trait WorkerFactory: Send + Sync {
    fn launch(&self, symbol: &Symbol, stop: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<WorkerExit>>;
}

/// Worker tuning shared by every symbol.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub tp_refresh: Duration,
    pub entry_timeout: chrono::Duration,
    pub wallet_exposure: Decimal,
    /// Symbols that may hold positions at once
    pub symbols_allowed: usize,
    pub filter: CandidateFilter,
    pub entry_rules: EntryRules,
}

impl WorkerSettings {
    pub fn from_config(config: &Config, symbols_allowed: usize, strategy: StrategyKind) -> Self {
        Self {
            interval: config.worker.interval(),
            retry: RetryPolicy::new(config.worker.max_retries, config.worker.retry_delay()),
            tp_refresh: Duration::from_secs(config.worker.tp_refresh_secs),
            entry_timeout: chrono::Duration::seconds(config.worker.entry_timeout_secs as i64),
            wallet_exposure: config.bot.wallet_exposure,
            symbols_allowed,
            filter: CandidateFilter {
                allow: config.bot.whitelist.clone(),
                deny: config.bot.blacklist.clone(),
                max_value: Some(config.bot.max_usd_value),
                bias: strategy.bias(),
            },
            entry_rules: EntryRules::new(&config.bot, strategy),
        }
    }
}

/// Collaborators shared by all workers.
pub struct WorkerContext {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub candidates: Arc<dyn CandidateSource>,
    /// Latest candidate set published by the rotation controller
    pub rotator_set: watch::Receiver<Arc<HashSet<Symbol>>>,
    pub settings: WorkerSettings,
    pub dashboard: Option<Arc<DashboardStore>>,
    pub journal: Option<Arc<Journal>>,
}

impl WorkerContext {
    /// Run one exchange call under the retry policy.
    async fn call<T, F, Fut>(&self, symbol: &Symbol, call: &'static str, op: F) -> Result<T, WorkerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ExchangeResult<T>>,
    {
        self.settings
            .retry
            .run(call, op)
            .await
            .map_err(|source| WorkerError::Exchange {
                symbol: symbol.clone(),
                call,
                source,
            })
    }

    fn is_eligible(&self, symbol: &Symbol) -> bool {
        self.rotator_set.borrow().contains(symbol) && self.settings.filter.permits(symbol)
    }
}

/// Launches real trading workers.
pub struct TradingWorkerFactory {
    ctx: Arc<WorkerContext>,
}

impl TradingWorkerFactory {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }
}

impl WorkerFactory for TradingWorkerFactory {
    fn launch(&self, symbol: &Symbol, stop: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<WorkerExit>> {
        let runtime = tokio::runtime::Handle::try_current().context("No tokio runtime to spawn worker on")?;
        let worker = Worker::new(symbol.clone(), Arc::clone(&self.ctx), stop);
        Ok(runtime.spawn(worker.run()))
    }
}

/// Result of one iteration.
enum Step {
    Continue,
    Ineligible,
}

/// Trading loop for one symbol.
pub struct Worker {
    symbol: Symbol,
    ctx: Arc<WorkerContext>,
    stop: watch::Receiver<bool>,
    rules: Option<(InstrumentRules, Decimal)>,
    next_tp_refresh: HashMap<PositionSide, Instant>,
}

impl Worker {
    pub fn new(symbol: Symbol, ctx: Arc<WorkerContext>, stop: watch::Receiver<bool>) -> Self {
        Self {
            symbol,
            ctx,
            stop,
            rules: None,
            next_tp_refresh: HashMap::new(),
        }
    }

    /// Loop until stopped, ineligible or failed.
    ///
    /// A clean exit drops the symbol's dashboard row; a failed worker leaves
    /// its last row in place.
    pub async fn run(mut self) -> WorkerExit {
        info!(symbol = %self.symbol, "Worker started");

        let exit = self.run_loop().await;
        if matches!(exit, WorkerExit::Stopped | WorkerExit::Ineligible) {
            self.clear_dashboard();
        }
        exit
    }

    async fn run_loop(&mut self) -> WorkerExit {
        loop {
            if *self.stop.borrow() {
                info!(symbol = %self.symbol, "Worker stopping");
                return WorkerExit::Stopped;
            }

            match self.iterate().await {
                Ok(Step::Continue) => {}
                Ok(Step::Ineligible) => {
                    info!(symbol = %self.symbol, "Symbol no longer eligible, worker exiting");
                    return WorkerExit::Ineligible;
                }
                Err(e) => {
                    let e = anyhow::Error::from(e);
                    error!(symbol = %self.symbol, error = ?e, "Worker failed");
                    return WorkerExit::Failed(format!("{:#}", e));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.ctx.settings.interval) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        // Controller dropped the handle
                        return WorkerExit::Stopped;
                    }
                }
            }
        }
    }

    fn clear_dashboard(&self) {
        if let Some(dashboard) = &self.ctx.dashboard {
            if let Err(e) = dashboard.remove(&self.symbol) {
                warn!(symbol = %self.symbol, error = %e, "Failed to clear dashboard row");
            }
        }
    }

    #[instrument(skip(self), fields(symbol = %self.symbol))]
    async fn iterate(&mut self) -> Result<Step, WorkerError> {
        let ctx = Arc::clone(&self.ctx);
        let gateway = ctx.gateway.as_ref();
        let symbol = &self.symbol;

        let hedge = ctx
            .call(symbol, "get_position", move || gateway.get_position(symbol))
            .await?;

        let manage_only = !ctx.is_eligible(symbol);
        if manage_only && !hedge.has_exposure() {
            return Ok(Step::Ineligible);
        }
        if manage_only {
            debug!(%symbol, "Ineligible with open position, managing exits only");
        }

        let (rules, leverage) = self.instrument(&ctx).await?;
        let symbol = &self.symbol;

        let balance = ctx
            .call(symbol, "get_balance", move || gateway.get_balance(QUOTE))
            .await?;
        let book = ctx
            .call(symbol, "get_book_top", move || gateway.get_book_top(symbol))
            .await?;
        let one_minute = self.averages(&ctx, CandleInterval::OneMinute).await?;
        let five_minute = self.averages(&ctx, CandleInterval::FiveMinutes).await?;
        let symbol = &self.symbol;

        let metrics = match ctx.candidates.get_metrics(symbol).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(%symbol, error = %e, "Failed to read market metrics");
                None
            }
        };

        let positions = ctx
            .call(symbol, "get_open_positions", move || gateway.get_open_positions())
            .await?;
        let held: HashSet<&Symbol> = positions
            .iter()
            .filter(|p| p.size > Decimal::ZERO)
            .map(|p| &p.symbol)
            .collect();
        let can_open_new = held.contains(symbol) || held.len() < ctx.settings.symbols_allowed;

        let sizing = PositionSizing::compute(
            balance.total_equity,
            ctx.settings.wallet_exposure,
            book.best_ask,
            &rules,
            leverage,
        );

        if let Some(dashboard) = &ctx.dashboard {
            let snapshot = SymbolSnapshot {
                symbol: symbol.clone(),
                min_qty: rules.min_order_qty,
                current_price: book.mid(),
                balance: balance.total_equity,
                available_bal: balance.available,
                volume: metrics.as_ref().map_or(Decimal::ZERO, |m| m.volume_1m),
                spread: metrics.as_ref().map_or(Decimal::ZERO, |m| m.spread_5m),
                trend: metrics
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |m| format!("{:?}", m.trend).to_lowercase()),
                long_pos_qty: hedge.long.qty,
                short_pos_qty: hedge.short.qty,
                long_upnl: hedge.long.unrealised_pnl,
                short_upnl: hedge.short.unrealised_pnl,
                long_cum_pnl: hedge.long.cum_realised_pnl,
                short_cum_pnl: hedge.short.cum_realised_pnl,
                long_pos_price: hedge.long.entry_price,
                short_pos_price: hedge.short.entry_price,
                manage_only,
                updated_at: Utc::now(),
            };
            if let Err(e) = dashboard.update(snapshot) {
                warn!(%symbol, error = %e, "Failed to write dashboard");
            }
        }

        let open_orders = ctx
            .call(symbol, "get_open_orders", move || gateway.get_open_orders(symbol))
            .await?;

        if !manage_only {
            if let (Some(metrics), Some(averages)) = (&metrics, &one_minute) {
                let intents = ctx.settings.entry_rules.evaluate(&EntryContext {
                    book,
                    averages,
                    metrics,
                    hedge: &hedge,
                    sizing,
                    can_open_new,
                });
                for intent in intents {
                    self.place_entry(&ctx, &intent, &open_orders).await?;
                }
            } else {
                debug!(
                    %symbol,
                    has_metrics = metrics.is_some(),
                    has_candles = one_minute.is_some(),
                    "Not enough market data for entries"
                );
            }
        }

        let spread = five_minute.map(|ma| ma.ma6_spread());
        self.maintain_take_profits(&ctx, &hedge, spread, rules.tick_size, &open_orders)
            .await?;

        for order in stale_entries(&open_orders, Utc::now(), ctx.settings.entry_timeout) {
            debug!(symbol = %self.symbol, order_id = %order.order_id, "Cancelling stale entry");
            self.cancel(&ctx, order).await?;
        }

        Ok(Step::Continue)
    }

    /// Instrument rules and leverage, fetched and applied once.
    async fn instrument(&mut self, ctx: &WorkerContext) -> Result<(InstrumentRules, Decimal), WorkerError> {
        if let Some(cached) = self.rules {
            return Ok(cached);
        }

        let gateway = ctx.gateway.as_ref();
        let symbol = &self.symbol;
        let rules = ctx
            .call(symbol, "get_instrument_rules", move || gateway.get_instrument_rules(symbol))
            .await?;

        let leverage = rules.max_leverage.max(Decimal::ONE);
        let applied = ctx
            .call(symbol, "set_leverage", move || gateway.set_leverage(symbol, leverage))
            .await;
        let leverage = match applied {
            Ok(()) => {
                info!(%symbol, %leverage, "Leverage set to maximum");
                leverage
            }
            Err(e) => {
                warn!(%symbol, error = ?anyhow::Error::from(e), "Failed to set leverage, sizing at 1x");
                Decimal::ONE
            }
        };

        self.rules = Some((rules, leverage));
        Ok((rules, leverage))
    }

    async fn averages(&self, ctx: &WorkerContext, interval: CandleInterval) -> Result<Option<MovingAverages>, WorkerError> {
        let gateway = ctx.gateway.as_ref();
        let symbol = &self.symbol;
        let candles = ctx
            .call(symbol, "get_candles", move || gateway.get_candles(symbol, interval, CANDLE_LIMIT))
            .await?;
        Ok(MovingAverages::from_candles(&candles))
    }

    async fn place_entry(&self, ctx: &WorkerContext, intent: &EntryIntent, open_orders: &[OpenOrder]) -> Result<(), WorkerError> {
        let side = intent.side;
        let resting = open_orders
            .iter()
            .any(|o| !o.reduce_only && o.side == side.entry_side() && o.position_side.map_or(true, |p| p == side));
        if resting {
            debug!(symbol = %self.symbol, ?side, "Entry already resting");
            return Ok(());
        }

        info!(
            symbol = %self.symbol,
            ?side,
            qty = %intent.qty,
            price = %intent.price,
            add = intent.reason == EntryReason::Add,
            "Placing entry"
        );
        let order = NewOrder::entry(&self.symbol, side, intent.qty, intent.price);
        self.place(ctx, &order).await
    }

    async fn maintain_take_profits(
        &mut self,
        ctx: &WorkerContext,
        hedge: &HedgePosition,
        spread: Option<Decimal>,
        tick_size: Decimal,
        open_orders: &[OpenOrder],
    ) -> Result<(), WorkerError> {
        for side in [PositionSide::Long, PositionSide::Short] {
            let leg = hedge.leg(side);
            let target = match (leg.entry_price, spread) {
                (Some(entry), Some(spread)) => Some(take_profit_price(side, entry, spread, tick_size)),
                _ => None,
            };
            let refresh_due = self
                .next_tp_refresh
                .get(&side)
                .map_or(true, |due| Instant::now() >= *due);

            match plan_take_profit(&self.symbol, side, leg, target, open_orders, refresh_due) {
                TpAction::Keep => {}
                TpAction::Place(order) => {
                    info!(symbol = %self.symbol, ?side, price = ?order.price, qty = %order.qty, "Placing take profit");
                    self.place(ctx, &order).await?;
                    self.next_tp_refresh.insert(side, Instant::now() + ctx.settings.tp_refresh);
                }
                TpAction::Replace { cancel, order } => {
                    info!(symbol = %self.symbol, ?side, price = ?order.price, qty = %order.qty, "Replacing take profit");
                    for order_id in cancel {
                        self.cancel_id(ctx, &order_id).await?;
                    }
                    self.place(ctx, &order).await?;
                    self.next_tp_refresh.insert(side, Instant::now() + ctx.settings.tp_refresh);
                }
                TpAction::Cancel(ids) => {
                    for order_id in ids {
                        self.cancel_id(ctx, &order_id).await?;
                    }
                    self.next_tp_refresh.remove(&side);
                }
            }
        }
        Ok(())
    }

    /// Place an order; venue rejections are logged, exhausted retries fail the worker.
    async fn place(&self, ctx: &WorkerContext, order: &NewOrder) -> Result<(), WorkerError> {
        let gateway = ctx.gateway.as_ref();
        match ctx
            .call(&self.symbol, "place_order", move || gateway.place_order(order))
            .await
        {
            Ok(ack) => {
                if let Some(journal) = &ctx.journal {
                    if let Err(e) = journal.record_order_placed(
                        &self.symbol,
                        &ack.order_id,
                        order.side,
                        order.qty,
                        order.price,
                        order.reduce_only,
                    ) {
                        warn!(symbol = %self.symbol, error = %e, "Failed to journal order");
                    }
                }
                Ok(())
            }
            Err(WorkerError::Exchange { source, .. }) if !source.is_transient() => {
                warn!(symbol = %self.symbol, error = %source, "Order rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, ctx: &WorkerContext, order: &OpenOrder) -> Result<(), WorkerError> {
        self.cancel_id(ctx, &order.order_id).await
    }

    async fn cancel_id(&self, ctx: &WorkerContext, order_id: &str) -> Result<(), WorkerError> {
        let gateway = ctx.gateway.as_ref();
        let symbol = &self.symbol;
        match ctx
            .call(symbol, "cancel_order", move || gateway.cancel_order(symbol, order_id))
            .await
        {
            Ok(()) => {
                if let Some(journal) = &ctx.journal {
                    if let Err(e) = journal.record_order_cancelled(symbol, order_id) {
                        warn!(%symbol, error = %e, "Failed to journal cancel");
                    }
                }
                Ok(())
            }
            Err(WorkerError::Exchange { source, .. }) if !source.is_transient() => {
                // Usually filled or already cancelled
                warn!(%symbol, %order_id, error = %source, "Cancel rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::{Signal, StaticCandidateSource, SymbolMetrics};
    use crate::exchange::{Candle, OrderSide, PaperExchange};
    use rust_decimal_macros::dec;

    fn candles(high: Decimal, low: Decimal) -> Vec<Candle> {
        (0..CANDLE_LIMIT as i64)
            .map(|i| Candle {
                open_time: i * 60_000,
                open: low,
                high,
                low,
                close: high,
                volume: dec!(100),
            })
            .collect()
    }

    fn metrics(symbol: &Symbol) -> SymbolMetrics {
        SymbolMetrics {
            symbol: symbol.clone(),
            price: dec!(100),
            min_qty: dec!(0.1),
            volume_1m: dec!(20000),
            volume_5m: dec!(80000),
            spread_5m: dec!(0.5),
            trend: Signal::Long,
            mfi: Signal::Long,
            eri_trend: Signal::Neutral,
        }
    }

    async fn paper(symbol: &Symbol) -> Arc<PaperExchange> {
        let venue = Arc::new(PaperExchange::new(dec!(10000)));
        venue.set_book_top(symbol, dec!(98), dec!(98.1)).await;
        // 1m band 99-101, 5m band 96-104
        venue.set_candles(symbol, CandleInterval::OneMinute, candles(dec!(101), dec!(99))).await;
        venue.set_candles(symbol, CandleInterval::FiveMinutes, candles(dec!(104), dec!(96))).await;
        venue
            .set_instrument_rules(
                symbol,
                InstrumentRules {
                    tick_size: dec!(0.01),
                    qty_step: dec!(0.1),
                    min_order_qty: dec!(0.1),
                    max_leverage: dec!(10),
                },
            )
            .await;
        venue
    }

    fn settings() -> WorkerSettings {
        let mut config = Config::default();
        config.bot.wallet_exposure = dec!(0.01);
        let mut settings = WorkerSettings::from_config(&config, 5, StrategyKind::Hedge);
        settings.retry = RetryPolicy::once();
        settings
    }

    fn context(
        venue: Arc<PaperExchange>,
        symbol: &Symbol,
        eligible: bool,
    ) -> (Arc<WorkerContext>, watch::Sender<Arc<HashSet<Symbol>>>) {
        let set: HashSet<Symbol> = if eligible { [symbol.clone()].into() } else { HashSet::new() };
        let (tx, rx) = watch::channel(Arc::new(set));
        let ctx = WorkerContext {
            gateway: venue,
            candidates: Arc::new(StaticCandidateSource::new([symbol.clone()]).with_metrics(metrics(symbol))),
            rotator_set: rx,
            settings: settings(),
            dashboard: None,
            journal: None,
        };
        (Arc::new(ctx), tx)
    }

    #[tokio::test]
    async fn test_iteration_places_long_entry_below_ma3_low() {
        let symbol = Symbol::new("SOLUSDT");
        let venue = paper(&symbol).await;
        let (ctx, _tx) = context(venue.clone(), &symbol, true);
        let (_stop_tx, stop) = watch::channel(false);

        let mut worker = Worker::new(symbol.clone(), ctx, stop);
        assert!(matches!(worker.iterate().await.unwrap(), Step::Continue));

        let orders = venue.get_open_orders(&symbol).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Buy);
        assert_eq!(orders[0].price, dec!(98));
        // 10000 * 0.01 / 98.1 = 1.019.. -> 1.0
        assert_eq!(orders[0].qty, dec!(1));
        assert_eq!(venue.get_state().await.leverage[&symbol], dec!(10));
    }

    #[tokio::test]
    async fn test_take_profit_placed_for_open_leg() {
        let symbol = Symbol::new("SOLUSDT");
        let venue = paper(&symbol).await;
        venue.set_position(&symbol, PositionSide::Long, dec!(2), dec!(99)).await;
        let (ctx, _tx) = context(venue.clone(), &symbol, false);
        let (_stop_tx, stop) = watch::channel(false);

        // Ineligible but holding a position: manage-only
        let mut worker = Worker::new(symbol.clone(), ctx, stop);
        assert!(matches!(worker.iterate().await.unwrap(), Step::Continue));

        let orders = venue.get_open_orders(&symbol).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].side, OrderSide::Sell);
        // entry 99 + (104 - 96)
        assert_eq!(orders[0].price, dec!(107));
        assert_eq!(orders[0].qty, dec!(2));
    }

    #[tokio::test]
    async fn test_ineligible_flat_worker_exits() {
        let symbol = Symbol::new("SOLUSDT");
        let venue = paper(&symbol).await;
        let (ctx, _tx) = context(venue, &symbol, false);
        let (_stop_tx, stop) = watch::channel(false);

        let exit = Worker::new(symbol, ctx, stop).run().await;
        assert_eq!(exit, WorkerExit::Ineligible);
    }

    #[tokio::test]
    async fn test_clean_exit_drops_dashboard_row() {
        let symbol = Symbol::new("SOLUSDT");
        let venue = paper(&symbol).await;
        let dir = tempfile::tempdir().unwrap();
        let dashboard = Arc::new(DashboardStore::new(dir.path()).unwrap());
        let (set_tx, set_rx) = watch::channel(Arc::new(HashSet::from([symbol.clone()])));
        let ctx = Arc::new(WorkerContext {
            gateway: venue,
            candidates: Arc::new(StaticCandidateSource::new([symbol.clone()]).with_metrics(metrics(&symbol))),
            rotator_set: set_rx,
            settings: settings(),
            dashboard: Some(dashboard.clone()),
            journal: None,
        });
        let (_stop_tx, stop) = watch::channel(false);

        let mut worker = Worker::new(symbol.clone(), ctx, stop);
        worker.iterate().await.unwrap();
        assert!(DashboardStore::load(dashboard.path()).unwrap().contains_key(&symbol));

        // Dropped from the rotator set while flat
        set_tx.send_replace(Arc::new(HashSet::new()));
        assert_eq!(worker.run().await, WorkerExit::Ineligible);
        assert!(DashboardStore::load(dashboard.path()).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_interrupts_sleep() {
        let symbol = Symbol::new("SOLUSDT");
        let venue = paper(&symbol).await;
        let (ctx, _tx) = context(venue, &symbol, true);
        let (stop_tx, stop) = watch::channel(false);

        let task = tokio::spawn(Worker::new(symbol, ctx, stop).run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop_tx.send(true).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Stopped);
    }

    #[tokio::test]
    async fn test_unreachable_venue_fails_worker() {
        let symbol = Symbol::new("XRPUSDT");
        // No market data injected: every market call fails
        let venue = Arc::new(PaperExchange::new(dec!(1000)));
        venue.set_position(&symbol, PositionSide::Short, dec!(1), dec!(1)).await;
        let (ctx, _tx) = context(venue, &symbol, true);
        let (_stop_tx, stop) = watch::channel(false);

        let exit = Worker::new(symbol, ctx, stop).run().await;
        assert!(matches!(exit, WorkerExit::Failed(reason) if reason.contains("get_instrument_rules")));
    }
}
