//! Stub worker factory for lifecycle tests.

use super::{WorkerExit, WorkerFactory};
use crate::exchange::Symbol;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What a stub worker does once launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behaviour {
    /// Run until the stop signal
    WaitForStop,
    /// Never look at the stop signal
    IgnoreStop,
    /// End immediately with the given exit
    ExitAt(WorkerExit),
    Panic,
    /// Refuse to launch
    FailLaunch,
}

#[derive(Debug, Default)]
struct Counters {
    launches: usize,
    live: usize,
    peak: usize,
}

/// Worker factory whose tasks only exercise the lifecycle.
#[derive(Default)]
pub struct StubFactory {
    behaviours: Mutex<HashMap<Symbol, Behaviour>>,
    counters: Arc<Mutex<HashMap<Symbol, Counters>>>,
}

/// Decrements the live count however the task ends.
struct LiveGuard {
    symbol: Symbol,
    counters: Arc<Mutex<HashMap<Symbol, Counters>>>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Ok(mut counters) = self.counters.lock() {
            if let Some(c) = counters.get_mut(&self.symbol) {
                c.live -= 1;
            }
        }
    }
}

impl StubFactory {
    pub fn with(self, symbol: &str, behaviour: Behaviour) -> Self {
        self.set(symbol, behaviour);
        self
    }

    pub fn set(&self, symbol: &str, behaviour: Behaviour) {
        self.behaviours.lock().unwrap().insert(Symbol::new(symbol), behaviour);
    }

    pub fn launches(&self, symbol: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(&Symbol::new(symbol))
            .map_or(0, |c| c.launches)
    }

    /// Most workers ever running at once for a symbol.
    pub fn peak_concurrency(&self, symbol: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(&Symbol::new(symbol))
            .map_or(0, |c| c.peak)
    }
}

impl WorkerFactory for StubFactory {
    fn launch(&self, symbol: &Symbol, mut stop: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<WorkerExit>> {
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or(Behaviour::WaitForStop);

        if behaviour == Behaviour::FailLaunch {
            anyhow::bail!("launch refused for {}", symbol);
        }

        {
            let mut counters = self.counters.lock().unwrap();
            let c = counters.entry(symbol.clone()).or_default();
            c.launches += 1;
            c.live += 1;
            c.peak = c.peak.max(c.live);
        }
        let guard = LiveGuard {
            symbol: symbol.clone(),
            counters: Arc::clone(&self.counters),
        };

        Ok(tokio::spawn(async move {
            let _guard = guard;
            match behaviour {
                Behaviour::WaitForStop => {
                    let _ = stop.wait_for(|stopped| *stopped).await;
                    WorkerExit::Stopped
                }
                Behaviour::IgnoreStop => loop {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                },
                Behaviour::ExitAt(exit) => exit,
                Behaviour::Panic => panic!("stub worker panicked"),
                Behaviour::FailLaunch => unreachable!(),
            }
        }))
    }
}
