//! # Symbol Rotator
//!
//! A multi-symbol hedge-mode trading bot for Bybit perpetuals that rotates
//! its attention across a pool of candidate symbols.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `exchange`: Venue gateway trait, Bybit REST client and paper venue
//! - `candidates`: Candidate symbol feed and filtering
//! - `strategy`: Per-symbol entry, sizing and take-profit logic
//! - `worker`: One supervised trading task per symbol
//! - `rotation`: Controller deciding which symbols have a worker
//! - `persistence`: Dashboard snapshot and SQLite journal
//! - `utils`: Shared decimal arithmetic

pub mod candidates;
pub mod config;
pub mod exchange;
pub mod persistence;
pub mod rotation;
pub mod strategy;
pub mod utils;
pub mod worker;

pub use config::Config;
