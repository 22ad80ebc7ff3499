//! Shared dashboard snapshot.
//!
//! Every worker writes its latest view of its symbol into one JSON document
//! keyed by symbol. The file is replaced atomically so a reader never sees a
//! half-written document.

use crate::exchange::Symbol;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// File name inside the configured shared data directory.
pub const DASHBOARD_FILE: &str = "shared_data.json";

/// One symbol's row on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: Symbol,
    pub min_qty: Decimal,
    pub current_price: Decimal,
    pub balance: Decimal,
    pub available_bal: Decimal,
    pub volume: Decimal,
    pub spread: Decimal,
    pub trend: String,
    pub long_pos_qty: Decimal,
    pub short_pos_qty: Decimal,
    pub long_upnl: Decimal,
    pub short_upnl: Decimal,
    pub long_cum_pnl: Decimal,
    pub short_cum_pnl: Decimal,
    pub long_pos_price: Option<Decimal>,
    pub short_pos_price: Option<Decimal>,
    /// Worker is holding a position it may no longer add to
    #[serde(default)]
    pub manage_only: bool,
    pub updated_at: DateTime<Utc>,
}

/// Dashboard document writer shared by all workers.
pub struct DashboardStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<Symbol, SymbolSnapshot>>,
}

impl DashboardStore {
    /// Create a store writing `shared_data.json` under `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dashboard directory {:?}", dir))?;

        // Keep rows from a previous run until their workers report again
        let path = dir.join(DASHBOARD_FILE);
        let rows = Self::load(&path).unwrap_or_default();

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace one symbol's row and rewrite the document.
    pub fn update(&self, snapshot: SymbolSnapshot) -> Result<()> {
        let mut rows = self.lock_rows();
        rows.insert(snapshot.symbol.clone(), snapshot);
        self.write(&rows)
    }

    /// Drop a symbol's row. Returns whether a row was removed.
    pub fn remove(&self, symbol: &Symbol) -> Result<bool> {
        let mut rows = self.lock_rows();
        if rows.remove(symbol).is_none() {
            return Ok(false);
        }
        self.write(&rows)?;
        Ok(true)
    }

    fn lock_rows(&self) -> MutexGuard<'_, BTreeMap<Symbol, SymbolSnapshot>> {
        self.rows.lock().unwrap_or_else(|poisoned| {
            warn!("Dashboard mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Rewrite the whole document through a temp file.
    fn write(&self, rows: &BTreeMap<Symbol, SymbolSnapshot>) -> Result<()> {
        let json = serde_json::to_vec_pretty(rows).context("Failed to serialize dashboard")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }

    /// Read a dashboard document.
    pub fn load(path: &Path) -> Result<BTreeMap<Symbol, SymbolSnapshot>> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?}", path))
    }
}
