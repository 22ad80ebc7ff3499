//! Canonical instrument identifiers.
//!
//! Exchanges and data feeds decorate the same perpetual in different ways
//! ("BTC/USDT:USDT", "BTC/USDT", "btcusdt"). Everything inside the bot keys
//! on the normalized [`Symbol`] so two spellings of one instrument compare
//! equal.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;

/// Collapse exchange decorations to the canonical form.
///
/// Drops the settlement suffix after the first `:`, removes `/`
/// separators and whitespace, and upper-cases the result. Applying it twice
/// yields the same string.
pub fn normalize(raw: &str) -> String {
    let head = raw.split(':').next().unwrap_or_default();
    head.chars()
        .filter(|c| *c != '/' && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// A normalized exchange instrument (e.g. `BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Build a symbol from any exchange spelling.
    pub fn new(raw: &str) -> Self {
        Self(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Symbol::new(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_strips_decorations() {
        assert_eq!(normalize("BTC/USDT:USDT"), "BTCUSDT");
        assert_eq!(normalize("BTC/USDT"), "BTCUSDT");
        assert_eq!(normalize(" ethusdt "), "ETHUSDT");
        assert_eq!(normalize("1000PEPE/USDT:USDT"), "1000PEPEUSDT");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["BTC/USDT:USDT", "BTCUSDT", "sol/usdt", ":USDT", "", "A/B:C:D"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_symbol_equality_across_spellings() {
        assert_eq!(Symbol::new("BTC/USDT:USDT"), Symbol::new("BTCUSDT"));

        let set: HashSet<Symbol> = ["BTC/USDT:USDT", "BTCUSDT", "btc/usdt"]
            .into_iter()
            .map(Symbol::from)
            .collect();
        assert_eq!(set.len(), 1);
        assert!(set.contains("BTCUSDT"));
    }

    #[test]
    fn test_symbol_serde_normalizes() {
        let parsed: Symbol = serde_json::from_str("\"XRP/USDT:USDT\"").unwrap();
        assert_eq!(parsed.as_str(), "XRPUSDT");
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"XRPUSDT\"");
    }
}
