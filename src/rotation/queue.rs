//! Round-robin pool of candidate symbols.

use crate::exchange::Symbol;
use std::collections::{HashSet, VecDeque};

/// Ordered, duplicate-free queue of candidates.
///
/// Picking a symbol moves it to the back, so every candidate gets a turn
/// before any is picked twice.
#[derive(Debug, Default)]
pub struct RotationQueue {
    order: VecDeque<Symbol>,
    members: HashSet<Symbol>,
}

impl RotationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a fresh candidate list.
    ///
    /// Symbols already queued keep their position, new ones are appended in
    /// the order given, and symbols missing from `fresh` are dropped.
    pub fn merge(&mut self, fresh: &[Symbol]) {
        let incoming: HashSet<&Symbol> = fresh.iter().collect();
        self.order.retain(|s| incoming.contains(s));
        self.members.retain(|s| incoming.contains(s));

        for symbol in fresh {
            if self.members.insert(symbol.clone()) {
                self.order.push_back(symbol.clone());
            }
        }
    }

    /// Take the first symbol satisfying `available` and rotate it to the back.
    pub fn next_available(&mut self, mut available: impl FnMut(&Symbol) -> bool) -> Option<Symbol> {
        let index = self.order.iter().position(|s| available(s))?;
        let symbol = self.order.remove(index)?;
        self.order.push_back(symbol.clone());
        Some(symbol)
    }

    pub fn remove(&mut self, symbol: &Symbol) -> bool {
        if !self.members.remove(symbol) {
            return false;
        }
        self.order.retain(|s| s != symbol);
        true
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Queue contents front to back.
    pub fn snapshot(&self) -> Vec<Symbol> {
        self.order.iter().cloned().collect()
    }

    /// Queue membership as a set.
    pub fn members(&self) -> HashSet<Symbol> {
        self.members.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<Symbol> {
        names.iter().map(|n| Symbol::new(n)).collect()
    }

    #[test]
    fn test_merge_keeps_order_and_dedupes() {
        let mut queue = RotationQueue::new();
        queue.merge(&symbols(&["AAAUSDT", "BBBUSDT", "CCCUSDT"]));
        queue.next_available(|s| s.as_str() == "AAAUSDT");
        assert_eq!(queue.snapshot(), symbols(&["BBBUSDT", "CCCUSDT", "AAAUSDT"]));

        // B disappears, D is new, A and C keep their relative order
        queue.merge(&symbols(&["DDDUSDT", "AAAUSDT", "CCCUSDT", "DDD/USDT:USDT"]));
        assert_eq!(queue.snapshot(), symbols(&["CCCUSDT", "AAAUSDT", "DDDUSDT"]));
        assert!(!queue.contains(&Symbol::new("BBBUSDT")));
    }

    #[test]
    fn test_round_robin_visits_everyone() {
        let mut queue = RotationQueue::new();
        queue.merge(&symbols(&["AAAUSDT", "BBBUSDT", "CCCUSDT"]));

        let picks: Vec<Symbol> = (0..4).filter_map(|_| queue.next_available(|_| true)).collect();
        assert_eq!(picks, symbols(&["AAAUSDT", "BBBUSDT", "CCCUSDT", "AAAUSDT"]));
    }

    #[test]
    fn test_next_available_skips_unavailable() {
        let mut queue = RotationQueue::new();
        queue.merge(&symbols(&["AAAUSDT", "BBBUSDT"]));

        let busy = Symbol::new("AAAUSDT");
        assert_eq!(queue.next_available(|s| s != &busy), Some(Symbol::new("BBBUSDT")));
        assert_eq!(queue.next_available(|_| false), None);
        assert_eq!(queue.snapshot(), symbols(&["AAAUSDT", "BBBUSDT"]));
    }

    #[test]
    fn test_remove() {
        let mut queue = RotationQueue::new();
        queue.merge(&symbols(&["AAAUSDT", "BBBUSDT"]));

        assert!(queue.remove(&Symbol::new("AAAUSDT")));
        assert!(!queue.remove(&Symbol::new("AAAUSDT")));
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
    }
}
