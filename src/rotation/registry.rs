//! Registry of live worker handles.

use crate::exchange::Symbol;
use crate::worker::{ExitOutcome, WorkerFactory, WorkerHandle};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// Lock a mutex, recovering from poisoning if necessary.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Worker registry mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Symbol to worker map.
///
/// Every compound operation holds the lock from check to mutation, and no
/// method awaits while holding it.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<Symbol, WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a worker for `symbol` unless one is already registered.
    ///
    /// Returns `Ok(false)` when a worker already exists.
    pub fn try_spawn(&self, symbol: &Symbol, factory: &dyn WorkerFactory) -> Result<bool> {
        let mut workers = lock_or_recover(&self.workers);
        if workers.contains_key(symbol) {
            return Ok(false);
        }
        let handle = WorkerHandle::spawn(symbol, factory)?;
        workers.insert(symbol.clone(), handle);
        Ok(true)
    }

    /// Remove every worker whose task has ended and return how each ended.
    pub fn reap_finished(&self) -> Vec<(Symbol, ExitOutcome)> {
        let mut workers = lock_or_recover(&self.workers);
        let finished: Vec<Symbol> = workers
            .iter()
            .filter(|(_, handle)| !handle.is_alive())
            .map(|(symbol, _)| symbol.clone())
            .collect();

        let mut reaped = Vec::with_capacity(finished.len());
        for symbol in finished {
            let Some(handle) = workers.remove(&symbol) else {
                continue;
            };
            match handle.reap() {
                Ok(outcome) => reaped.push((symbol, outcome)),
                // Not actually done; keep tracking it
                Err(handle) => {
                    workers.insert(symbol, handle);
                }
            }
        }
        reaped.sort_by(|a, b| a.0.cmp(&b.0));
        reaped
    }

    /// Remove a worker so the caller can shut it down.
    pub fn take(&self, symbol: &Symbol) -> Option<WorkerHandle> {
        lock_or_recover(&self.workers).remove(symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        lock_or_recover(&self.workers).contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.workers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered symbols, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = lock_or_recover(&self.workers).keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Registered symbols with their dwell time, longest dwelling first.
    pub fn oldest_first(&self) -> Vec<(Symbol, Duration)> {
        let mut dwell: Vec<(Symbol, Duration)> = lock_or_recover(&self.workers)
            .iter()
            .map(|(symbol, handle)| (symbol.clone(), handle.dwell()))
            .collect();
        dwell.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        dwell
    }

    /// Remove and return every handle.
    pub fn drain(&self) -> Vec<WorkerHandle> {
        lock_or_recover(&self.workers).drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{Behaviour, StubFactory};
    use crate::worker::WorkerExit;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_try_spawn_refuses_duplicates() {
        let factory = StubFactory::default();
        let registry = WorkerRegistry::new();
        let btc = Symbol::new("BTCUSDT");

        assert!(tokio_test::assert_ok!(registry.try_spawn(&btc, &factory)));
        assert!(!registry.try_spawn(&Symbol::new("BTC/USDT:USDT"), &factory).unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.launches("BTCUSDT"), 1);

        for handle in registry.drain() {
            handle.abort();
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_no_entry() {
        let factory = StubFactory::default().with("ETHUSDT", Behaviour::FailLaunch);
        let registry = WorkerRegistry::new();

        tokio_test::assert_err!(registry.try_spawn(&Symbol::new("ETHUSDT"), &factory));
        assert!(!registry.contains(&Symbol::new("ETHUSDT")));
    }

    #[tokio::test]
    async fn test_reap_only_removes_finished() {
        let factory = StubFactory::default()
            .with("DEADUSDT", Behaviour::ExitAt(WorkerExit::Failed("boom".into())))
            .with("GONEUSDT", Behaviour::Panic);
        let registry = WorkerRegistry::new();
        for name in ["LIVEUSDT", "DEADUSDT", "GONEUSDT"] {
            registry.try_spawn(&Symbol::new(name), &factory).unwrap();
        }
        settle().await;

        let reaped = registry.reap_finished();
        assert_eq!(reaped.len(), 2);
        assert_eq!(reaped[0].0, Symbol::new("DEADUSDT"));
        assert_eq!(reaped[0].1, ExitOutcome::Exited(WorkerExit::Failed("boom".into())));
        assert!(matches!(reaped[1].1, ExitOutcome::Panicked(_)));
        assert_eq!(registry.active_symbols(), vec![Symbol::new("LIVEUSDT")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oldest_first() {
        let factory = StubFactory::default();
        let registry = WorkerRegistry::new();

        registry.try_spawn(&Symbol::new("OLDUSDT"), &factory).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        registry.try_spawn(&Symbol::new("NEWUSDT"), &factory).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        let dwell = registry.oldest_first();
        assert_eq!(dwell[0], (Symbol::new("OLDUSDT"), Duration::from_secs(25)));
        assert_eq!(dwell[1], (Symbol::new("NEWUSDT"), Duration::from_secs(5)));
    }
}
