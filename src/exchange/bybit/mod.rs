//! Bybit exchange integration.
//!
//! Linear (USDT-settled) perpetuals through the v5 unified REST API,
//! with the account in hedge mode:
//! - position index 1 holds the long leg
//! - position index 2 holds the short leg

mod client;
mod types;

pub use client::BybitClient;
