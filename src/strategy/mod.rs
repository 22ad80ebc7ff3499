//! Per-symbol trading decisions.
//!
//! Contains the pure logic a worker applies each iteration:
//! - Moving averages over 1m and 5m candles
//! - Entry sizing from equity and instrument rules
//! - Entry and add conditions for both hedge legs
//! - Take-profit pricing and order maintenance

mod signals;
mod sizing;
mod take_profit;

pub use signals::{MovingAverages, MIN_CANDLES};
pub use sizing::PositionSizing;
pub use take_profit::{plan_take_profit, stale_entries, take_profit_price, TpAction};

use crate::candidates::{Bias, Signal, SymbolMetrics};
use crate::config::BotConfig;
use crate::exchange::{BookTop, HedgePosition, PositionSide};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// Strategy selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Trade both legs
    #[default]
    Hedge,
    LongOnly,
    ShortOnly,
}

impl StrategyKind {
    /// Candidate bias the rotation controller requests for this strategy.
    pub fn bias(&self) -> Bias {
        match self {
            StrategyKind::Hedge => Bias::Any,
            StrategyKind::LongOnly => Bias::Bullish,
            StrategyKind::ShortOnly => Bias::Bearish,
        }
    }

    pub fn trades(&self, side: PositionSide) -> bool {
        !matches!(
            (self, side),
            (StrategyKind::LongOnly, PositionSide::Short) | (StrategyKind::ShortOnly, PositionSide::Long)
        )
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Hedge => write!(f, "hedge"),
            StrategyKind::LongOnly => write!(f, "long"),
            StrategyKind::ShortOnly => write!(f, "short"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hedge" | "mfirsi_hedge" => Ok(StrategyKind::Hedge),
            "long" | "long_only" => Ok(StrategyKind::LongOnly),
            "short" | "short_only" => Ok(StrategyKind::ShortOnly),
            other => anyhow::bail!("unknown strategy '{}' (expected hedge, long or short)", other),
        }
    }
}

/// Why an entry order is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReason {
    /// First fill on a flat leg
    Open,
    /// Averaging into an open leg
    Add,
}

/// A maker entry the worker should place.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryIntent {
    pub side: PositionSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub reason: EntryReason,
}

/// Everything the entry rules look at for one symbol.
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub book: BookTop,
    /// Averages over 1m candles
    pub averages: &'a MovingAverages,
    pub metrics: &'a SymbolMetrics,
    pub hedge: &'a HedgePosition,
    pub sizing: PositionSizing,
    /// Whether another symbol may take on a position
    pub can_open_new: bool,
}

/// Entry thresholds and enabled sides.
#[derive(Debug, Clone)]
pub struct EntryRules {
    pub min_volume: Decimal,
    pub min_distance: Decimal,
    pub long_mode: bool,
    pub short_mode: bool,
}

impl EntryRules {
    pub fn new(bot: &BotConfig, kind: StrategyKind) -> Self {
        Self {
            min_volume: bot.min_volume,
            min_distance: bot.min_distance,
            long_mode: bot.long_mode && kind.trades(PositionSide::Long),
            short_mode: bot.short_mode && kind.trades(PositionSide::Short),
        }
    }

    /// Whether the symbol is liquid and wide enough to trade at all.
    pub fn market_qualifies(&self, metrics: &SymbolMetrics) -> bool {
        metrics.volume_1m >= self.min_volume && metrics.spread_5m >= self.min_distance
    }

    /// Entries to place this iteration, at most one per leg.
    pub fn evaluate(&self, ctx: &EntryContext<'_>) -> Vec<EntryIntent> {
        if !self.market_qualifies(ctx.metrics) {
            return Vec::new();
        }

        // A symbol without exposure counts against the symbol budget
        if !ctx.hedge.has_exposure() && !ctx.can_open_new {
            return Vec::new();
        }

        [PositionSide::Long, PositionSide::Short]
            .into_iter()
            .filter(|side| match side {
                PositionSide::Long => self.long_mode,
                PositionSide::Short => self.short_mode,
            })
            .filter_map(|side| self.evaluate_leg(ctx, side))
            .collect()
    }

    fn evaluate_leg(&self, ctx: &EntryContext<'_>, side: PositionSide) -> Option<EntryIntent> {
        let leg = ctx.hedge.leg(side);
        let ma = ctx.averages;

        let (price, opens, adds) = match side {
            PositionSide::Long => {
                let bid = ctx.book.best_bid;
                let below_entry = leg.entry_price.map_or(false, |entry| bid < entry);
                (bid, bid < ma.ma3_low, bid < ma.ma6_low && below_entry)
            }
            PositionSide::Short => {
                let ask = ctx.book.best_ask;
                let above_entry = leg.entry_price.map_or(false, |entry| ask > entry);
                (ask, ask > ma.ma3_high, ask > ma.ma6_high && above_entry)
            }
        };

        if !leg.is_open() {
            return (opens && leans(ctx.metrics, side)).then_some(EntryIntent {
                side,
                qty: ctx.sizing.entry_qty,
                price,
                reason: EntryReason::Open,
            });
        }

        (adds && ctx.sizing.room_for_add(leg.qty)).then_some(EntryIntent {
            side,
            qty: ctx.sizing.entry_qty,
            price,
            reason: EntryReason::Add,
        })
    }
}

/// Whether the feed's signals support opening `side`: the MFI signal when
/// it has one, the trend otherwise.
fn leans(metrics: &SymbolMetrics, side: PositionSide) -> bool {
    let wanted = match side {
        PositionSide::Long => Signal::Long,
        PositionSide::Short => Signal::Short,
    };
    match metrics.mfi {
        Signal::Neutral => metrics.trend == wanted,
        mfi => mfi == wanted,
    }
}
