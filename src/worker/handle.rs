//! Controller-side handle on one running worker task.

use super::{WorkerExit, WorkerFactory};
use crate::exchange::Symbol;
use anyhow::Result;
use futures_util::FutureExt;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(WorkerExit),
    Panicked(String),
    Cancelled,
}

impl From<Result<WorkerExit, JoinError>> for ExitOutcome {
    fn from(result: Result<WorkerExit, JoinError>) -> Self {
        match result {
            Ok(exit) => ExitOutcome::Exited(exit),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ExitOutcome::Panicked(message)
            }
            Err(_) => ExitOutcome::Cancelled,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(exit) => write!(f, "{}", exit),
            ExitOutcome::Panicked(msg) => write!(f, "panicked: {}", msg),
            ExitOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A spawned worker: its symbol, start instant, stop signal and task.
pub struct WorkerHandle {
    symbol: Symbol,
    started_at: Instant,
    stop: watch::Sender<bool>,
    join: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    /// Launch a worker for `symbol` through `factory`.
    pub fn spawn(symbol: &Symbol, factory: &dyn WorkerFactory) -> Result<Self> {
        let (stop, stop_rx) = watch::channel(false);
        let join = factory.launch(symbol, stop_rx)?;

        Ok(Self {
            symbol: symbol.clone(),
            started_at: Instant::now(),
            stop,
            join,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the worker was started.
    pub fn dwell(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Ask the worker to stop after its current step.
    pub fn request_stop(&self) {
        // No receiver means the task is already gone
        let _ = self.stop.send(true);
    }

    /// Collect the outcome of a finished task, or give the handle back.
    pub fn reap(mut self) -> std::result::Result<ExitOutcome, WorkerHandle> {
        if self.is_alive() {
            return Err(self);
        }
        match (&mut self.join).now_or_never() {
            Some(result) => Ok(result.into()),
            None => Err(self),
        }
    }

    /// Signal stop and wait up to `grace` for the task to end.
    ///
    /// Returns the handle when the worker outlives the grace period so the
    /// caller can keep tracking it.
    pub async fn shutdown(mut self, grace: Duration) -> Option<WorkerHandle> {
        self.request_stop();

        match timeout(grace, &mut self.join).await {
            Ok(result) => {
                let outcome = ExitOutcome::from(result);
                info!(symbol = %self.symbol, %outcome, "Worker shut down");
                None
            }
            Err(_) => {
                warn!(
                    symbol = %self.symbol,
                    grace_secs = grace.as_secs(),
                    "Worker still running after grace period"
                );
                Some(self)
            }
        }
    }

    /// Abort the task outright.
    pub fn abort(&self) {
        self.join.abort();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("symbol", &self.symbol)
            .field("dwell", &self.dwell())
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::testing::{Behaviour, StubFactory};

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_shutdown_within_grace() {
        let factory = StubFactory::default();
        let handle = WorkerHandle::spawn(&Symbol::new("BTCUSDT"), &factory).unwrap();
        assert!(handle.is_alive());

        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(handle.dwell(), Duration::from_secs(40));

        assert!(handle.shutdown(Duration::from_secs(10)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_worker_is_returned_as_straggler() {
        let factory = StubFactory::default().with("ETHUSDT", Behaviour::IgnoreStop);
        let handle = WorkerHandle::spawn(&Symbol::new("ETHUSDT"), &factory).unwrap();

        let straggler = handle.shutdown(Duration::from_secs(10)).await;
        let straggler = straggler.expect("worker should outlive its grace");
        assert!(straggler.is_alive());
        straggler.abort();
    }

    #[tokio::test]
    async fn test_reap_reports_exit_and_panic() {
        let factory = StubFactory::default()
            .with("AAAUSDT", Behaviour::ExitAt(WorkerExit::Ineligible))
            .with("BBBUSDT", Behaviour::Panic);

        let done = WorkerHandle::spawn(&Symbol::new("AAAUSDT"), &factory).unwrap();
        let boom = WorkerHandle::spawn(&Symbol::new("BBBUSDT"), &factory).unwrap();
        settle().await;

        assert_eq!(done.reap().unwrap(), ExitOutcome::Exited(WorkerExit::Ineligible));
        assert!(matches!(boom.reap().unwrap(), ExitOutcome::Panicked(_)));
    }

    #[tokio::test]
    async fn test_reap_gives_live_handle_back() {
        let factory = StubFactory::default();
        let handle = WorkerHandle::spawn(&Symbol::new("BTCUSDT"), &factory).unwrap();

        let handle = handle.reap().unwrap_err();
        assert!(handle.is_alive());
        handle.abort();
    }
}
