//! Candidate symbol selection.
//!
//! The rotation controller asks a [`CandidateSource`] which symbols are
//! worth trading; workers ask the same source for per-symbol market metrics.

mod feed;

pub use feed::{FeedCandidateSource, FeedRow};

use crate::exchange::Symbol;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Directional signal published by the market-data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String")]
pub enum Signal {
    Long,
    Short,
    #[default]
    Neutral,
}

impl From<String> for Signal {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "long" | "bullish" | "buy" => Signal::Long,
            "short" | "bearish" | "sell" => Signal::Short,
            _ => Signal::Neutral,
        }
    }
}

/// Which side of the market candidates must lean to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bias {
    #[default]
    Any,
    /// MFI signal long
    Bullish,
    /// MFI signal short
    Bearish,
}

impl Bias {
    pub fn admits(&self, mfi: Signal) -> bool {
        match self {
            Bias::Any => true,
            Bias::Bullish => mfi == Signal::Long,
            Bias::Bearish => mfi == Signal::Short,
        }
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Any => write!(f, "any"),
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
        }
    }
}

impl FromStr for Bias {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" | "both" => Ok(Bias::Any),
            "bullish" | "long" => Ok(Bias::Bullish),
            "bearish" | "short" => Ok(Bias::Bearish),
            other => anyhow::bail!("unknown bias '{}'", other),
        }
    }
}

/// Constraints applied to the candidate list.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Only these symbols, if non-empty
    pub allow: Vec<Symbol>,
    pub deny: Vec<Symbol>,
    /// Ceiling on `min_qty * price`
    pub max_value: Option<Decimal>,
    pub bias: Bias,
}

impl CandidateFilter {
    /// Whether the allow/deny lists admit a symbol.
    pub fn permits(&self, symbol: &Symbol) -> bool {
        (self.allow.is_empty() || self.allow.contains(symbol)) && !self.deny.contains(symbol)
    }
}

/// Market metrics for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolMetrics {
    pub symbol: Symbol,
    pub price: Decimal,
    pub min_qty: Decimal,
    pub volume_1m: Decimal,
    pub volume_5m: Decimal,
    /// 5-minute high/low spread, in percent
    pub spread_5m: Decimal,
    pub trend: Signal,
    pub mfi: Signal,
    pub eri_trend: Signal,
}

/// Supplies tradable symbols and their market metrics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Eligible symbols, best first. Empty means "no update".
    async fn get_candidate_symbols(&self, filter: &CandidateFilter) -> Result<Vec<Symbol>>;

    /// Latest metrics for a symbol, if the source knows it.
    async fn get_metrics(&self, symbol: &Symbol) -> Result<Option<SymbolMetrics>>;
}

/// Fixed candidate list, for tests and paper runs without a feed.
#[derive(Debug, Default)]
pub struct StaticCandidateSource {
    symbols: Vec<Symbol>,
    metrics: HashMap<Symbol, SymbolMetrics>,
}

impl StaticCandidateSource {
    pub fn new(symbols: impl IntoIterator<Item = impl Into<Symbol>>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: SymbolMetrics) -> Self {
        self.metrics.insert(metrics.symbol.clone(), metrics);
        self
    }
}

#[async_trait]
impl CandidateSource for StaticCandidateSource {
    async fn get_candidate_symbols(&self, filter: &CandidateFilter) -> Result<Vec<Symbol>> {
        Ok(self
            .symbols
            .iter()
            .filter(|s| filter.permits(s))
            .filter(|s| {
                self.metrics.get(*s).map_or(true, |m| {
                    filter.bias.admits(m.mfi)
                        && filter.max_value.map_or(true, |max| m.min_qty * m.price <= max)
                })
            })
            .cloned()
            .collect())
    }

    async fn get_metrics(&self, symbol: &Symbol) -> Result<Option<SymbolMetrics>> {
        Ok(self.metrics.get(symbol).cloned())
    }
}
