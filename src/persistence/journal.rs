//! SQLite journal of rotation events and order activity.

use crate::exchange::{OrderSide, Symbol};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Worker lifecycle event recorded by the rotation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationEvent {
    Started,
    /// Rotated out in favour of a fresh candidate
    Retired,
    /// Stopped because the active set exceeded capacity
    Shed,
    /// Worker stopped or found its symbol ineligible
    Exited,
    /// Worker failed or panicked
    Died,
}

impl RotationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationEvent::Started => "started",
            RotationEvent::Retired => "retired",
            RotationEvent::Shed => "shed",
            RotationEvent::Exited => "exited",
            RotationEvent::Died => "died",
        }
    }
}

/// Order activity recorded by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Placed,
    Cancelled,
}

impl OrderEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::Placed => "placed",
            OrderEvent::Cancelled => "cancelled",
        }
    }
}

/// One row of the rotation history.
#[derive(Debug, Clone)]
pub struct RotationRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub event: String,
    pub detail: String,
}

/// Per-symbol order counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStats {
    pub symbol: String,
    pub placed: u64,
    pub cancelled: u64,
}

/// SQLite-backed audit journal, shared by the controller and workers.
pub struct Journal {
    conn: Mutex<Connection>,
}

impl Journal {
    /// Open the journal, initializing the schema if needed.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let journal = Self {
            conn: Mutex::new(conn),
        };
        journal.init_schema()?;

        info!("Journal initialized at {:?}", path);
        Ok(journal)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("Journal mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            -- Worker lifecycle
            CREATE TABLE IF NOT EXISTS rotation_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                event TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_rotation_timestamp ON rotation_events(timestamp);

            -- Order activity
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                event TEXT NOT NULL,
                order_id TEXT NOT NULL,
                side TEXT,
                quantity TEXT,
                price TEXT,
                reduce_only INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol);
            "#,
        )?;
        Ok(())
    }

    /// Record a worker lifecycle event.
    pub fn record_rotation(&self, symbol: &Symbol, event: RotationEvent, detail: &str) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO rotation_events (timestamp, symbol, event, detail)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![Utc::now().to_rfc3339(), symbol.as_str(), event.as_str(), detail],
        )?;
        Ok(())
    }

    /// Record a placed order.
    pub fn record_order_placed(
        &self,
        symbol: &Symbol,
        order_id: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
        reduce_only: bool,
    ) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO orders (timestamp, symbol, event, order_id, side, quantity, price, reduce_only)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                Utc::now().to_rfc3339(),
                symbol.as_str(),
                OrderEvent::Placed.as_str(),
                order_id,
                side.as_str(),
                quantity.to_string(),
                price.map(|p| p.to_string()),
                reduce_only as i32,
            ],
        )?;
        Ok(())
    }

    /// Record a cancelled order.
    pub fn record_order_cancelled(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO orders (timestamp, symbol, event, order_id)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                Utc::now().to_rfc3339(),
                symbol.as_str(),
                OrderEvent::Cancelled.as_str(),
                order_id
            ],
        )?;
        Ok(())
    }

    /// Most recent rotation events, newest first.
    pub fn recent_rotations(&self, limit: usize) -> Result<Vec<RotationRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, symbol, event, detail
            FROM rotation_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map([limit], |row| {
                let ts: String = row.get(0)?;
                Ok(RotationRecord {
                    timestamp: DateTime::parse_from_rfc3339(&ts)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    symbol: row.get(1)?,
                    event: row.get(2)?,
                    detail: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Placed and cancelled order counts per symbol.
    pub fn order_stats(&self) -> Result<Vec<OrderStats>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT symbol,
                   SUM(CASE WHEN event = 'placed' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN event = 'cancelled' THEN 1 ELSE 0 END)
            FROM orders
            GROUP BY symbol
            ORDER BY symbol
            "#,
        )?;

        let stats = stmt
            .query_map([], |row| {
                Ok(OrderStats {
                    symbol: row.get(0)?,
                    placed: row.get::<_, i64>(1)? as u64,
                    cancelled: row.get::<_, i64>(2)? as u64,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(stats)
    }
}
