//! Files the bot leaves behind for operators.
//!
//! - `dashboard`: per-symbol JSON snapshot rewritten by workers
//! - `journal`: SQLite history of worker rotation and order activity

mod dashboard;
mod journal;

pub use dashboard::{DashboardStore, SymbolSnapshot, DASHBOARD_FILE};
pub use journal::{Journal, OrderEvent, OrderStats, RotationEvent, RotationRecord};
