//! Symbol rotation controller.
//!
//! Decides on a fixed cadence which symbols have a running worker:
//! - Symbols with open exchange positions always have one
//! - Remaining capacity is filled from the candidate queue
//! - Idle workers past the rotation threshold are swapped for fresh candidates
//!
//! All worker state is owned by one [`RotationController`]; nothing here is
//! process-global.

mod queue;
mod registry;

pub use queue::RotationQueue;
pub use registry::WorkerRegistry;

use crate::candidates::{CandidateFilter, CandidateSource};
use crate::config::Config;
use crate::exchange::{ExchangeGateway, Symbol};
use crate::persistence::{Journal, RotationEvent};
use crate::strategy::StrategyKind;
use crate::worker::{ExitOutcome, WorkerExit, WorkerFactory, WorkerHandle};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Target number of active workers
    pub capacity: usize,
    pub tick: Duration,
    pub refresh: Duration,
    /// Dwell time after which an idle worker may be rotated out
    pub threshold: Duration,
    /// How long a retired worker gets to stop
    pub grace: Duration,
    pub max_rotations_per_tick: usize,
    pub filter: CandidateFilter,
}

impl RotationSettings {
    pub fn from_config(config: &Config, capacity: usize, strategy: StrategyKind) -> Self {
        Self {
            capacity,
            tick: config.rotation.tick_interval(),
            refresh: config.rotation.refresh_interval(),
            threshold: config.rotation.rotation_threshold(),
            grace: config.rotation.retire_grace(),
            max_rotations_per_tick: config.rotation.max_rotations_per_tick,
            filter: CandidateFilter {
                allow: config.bot.whitelist.clone(),
                deny: config.bot.blacklist.clone(),
                max_value: Some(config.bot.max_usd_value),
                bias: strategy.bias(),
            },
        }
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub must_run: Vec<Symbol>,
    pub reaped: Vec<(Symbol, ExitOutcome)>,
    pub spawned: Vec<Symbol>,
    pub retired: Vec<Symbol>,
    pub shed: Vec<Symbol>,
    pub active: Vec<Symbol>,
}

/// Owns every worker and reconciles them against exchange state.
pub struct RotationController {
    settings: RotationSettings,
    gateway: Arc<dyn ExchangeGateway>,
    candidates: Arc<dyn CandidateSource>,
    factory: Arc<dyn WorkerFactory>,
    registry: WorkerRegistry,
    queue: RotationQueue,
    must_run: HashSet<Symbol>,
    last_refresh: Option<Instant>,
    /// Retired workers that outlived their grace period
    stragglers: Vec<WorkerHandle>,
    rotator_set: watch::Sender<Arc<HashSet<Symbol>>>,
    journal: Option<Arc<Journal>>,
}

impl RotationController {
    pub fn new(
        settings: RotationSettings,
        gateway: Arc<dyn ExchangeGateway>,
        candidates: Arc<dyn CandidateSource>,
        factory: Arc<dyn WorkerFactory>,
        rotator_set: watch::Sender<Arc<HashSet<Symbol>>>,
    ) -> Self {
        Self {
            settings,
            gateway,
            candidates,
            factory,
            registry: WorkerRegistry::new(),
            queue: RotationQueue::new(),
            must_run: HashSet::new(),
            last_refresh: None,
            stragglers: Vec::new(),
            rotator_set,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Symbols with a registered worker, sorted.
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.registry.active_symbols()
    }

    /// Symbols whose retired worker is still shutting down.
    pub fn straggling_symbols(&self) -> Vec<Symbol> {
        self.stragglers.iter().map(|h| h.symbol().clone()).collect()
    }

    pub fn queued_symbols(&self) -> Vec<Symbol> {
        self.queue.snapshot()
    }

    /// Reconcile on every tick until `shutdown` flips, then stop all workers.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            capacity = self.settings.capacity,
            tick_secs = self.settings.tick.as_secs(),
            threshold_secs = self.settings.threshold.as_secs(),
            "🔄 [ROTATE] Rotation controller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.reconcile().await;
                    debug!(
                        active = ?report.active,
                        spawned = report.spawned.len(),
                        retired = report.retired.len(),
                        "Tick complete"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown_all().await;
    }

    /// One reconciliation pass.
    #[instrument(skip(self))]
    pub async fn reconcile(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.refresh_must_run().await;
        report.must_run = sorted(&self.must_run);

        report.reaped = self.reap();

        // Must-run symbols are spawned regardless of capacity
        for symbol in report.must_run.clone() {
            if self.is_straggling(&symbol) {
                debug!(%symbol, "Must-run symbol still shutting down, spawn deferred");
                continue;
            }
            if self.spawn(&symbol) {
                report.spawned.push(symbol);
            }
        }

        if self.refresh_due() {
            self.refresh_candidates().await;
        }

        report.spawned.extend(self.fill_capacity());
        report.shed = self.shed_excess().await;
        report.retired = self.rotate_expired(&mut report.spawned).await;

        report.active = self.registry.active_symbols();
        if report.active.len() > self.settings.capacity {
            warn!(
                active = report.active.len(),
                capacity = self.settings.capacity,
                must_run = report.must_run.len(),
                "Open positions exceed capacity"
            );
        }
        report
    }

    /// Symbols with open positions.
    ///
    /// One attempt per tick. A failed fetch keeps the previous set and the
    /// next tick tries again, so a slow venue never holds up reaping.
    async fn refresh_must_run(&mut self) {
        match self.gateway.get_open_positions().await {
            Ok(positions) => {
                self.must_run = positions
                    .into_iter()
                    .filter(|p| p.size > rust_decimal::Decimal::ZERO && !p.symbol.is_empty())
                    .map(|p| p.symbol)
                    .collect();
            }
            Err(e) => {
                warn!(
                    error = %e,
                    kept = self.must_run.len(),
                    "Failed to fetch open positions, keeping previous must-run set until next tick"
                );
            }
        }
    }

    /// Drop finished workers and finished stragglers.
    fn reap(&mut self) -> Vec<(Symbol, ExitOutcome)> {
        let reaped = self.registry.reap_finished();
        for (symbol, outcome) in &reaped {
            match outcome {
                ExitOutcome::Exited(WorkerExit::Stopped | WorkerExit::Ineligible) => {
                    info!(%symbol, %outcome, "Worker ended")
                }
                _ => error!(%symbol, %outcome, "Worker died"),
            }
            let event = match outcome {
                ExitOutcome::Exited(WorkerExit::Stopped | WorkerExit::Ineligible) => RotationEvent::Exited,
                _ => RotationEvent::Died,
            };
            self.record(symbol, event, &outcome.to_string());
        }

        let mut still_running = Vec::with_capacity(self.stragglers.len());
        for handle in self.stragglers.drain(..) {
            let symbol = handle.symbol().clone();
            match handle.reap() {
                Ok(outcome) => info!(%symbol, %outcome, "Straggler finally exited"),
                Err(handle) => {
                    debug!(symbol = %handle.symbol(), dwell_secs = handle.dwell().as_secs(), "Straggler still running");
                    still_running.push(handle);
                }
            }
        }
        self.stragglers = still_running;

        reaped
    }

    /// Pull a fresh candidate list into the queue and publish it.
    async fn refresh_candidates(&mut self) {
        match self.candidates.get_candidate_symbols(&self.settings.filter).await {
            Ok(fresh) if fresh.is_empty() => {
                debug!("Candidate source returned nothing, keeping current queue");
                self.last_refresh = Some(Instant::now());
            }
            Ok(fresh) => {
                self.queue.merge(&fresh);
                self.last_refresh = Some(Instant::now());
                self.rotator_set.send_replace(Arc::new(self.queue.members()));
                info!(
                    candidates = fresh.len(),
                    queue = ?self.queue.snapshot(),
                    "📡 [CANDIDATES] Rotation queue refreshed"
                );
            }
            Err(e) => {
                // Retried on the next tick
                error!(error = ?e, "Failed to refresh candidate symbols");
            }
        }
    }

    fn refresh_due(&self) -> bool {
        self.last_refresh
            .map_or(true, |at| at.elapsed() >= self.settings.refresh)
    }

    /// Spawn queued candidates until the active set reaches capacity.
    fn fill_capacity(&mut self) -> Vec<Symbol> {
        let mut spawned = Vec::new();
        // Each queued symbol gets at most one attempt per tick
        for _ in 0..self.queue.len() {
            if self.registry.len() >= self.settings.capacity {
                break;
            }
            let Some(symbol) = self.next_candidate(None) else {
                break;
            };
            if self.spawn(&symbol) {
                spawned.push(symbol);
            }
        }
        spawned
    }

    /// Retire the longest-dwelling idle workers while over capacity.
    async fn shed_excess(&mut self) -> Vec<Symbol> {
        let mut shed = Vec::new();
        while self.registry.len() > self.settings.capacity {
            let victim = self
                .registry
                .oldest_first()
                .into_iter()
                .map(|(symbol, _)| symbol)
                .find(|symbol| !self.must_run.contains(symbol));
            let Some(symbol) = victim else {
                break;
            };
            info!(%symbol, capacity = self.settings.capacity, "Shedding idle worker over capacity");
            self.retire(&symbol, RotationEvent::Shed).await;
            shed.push(symbol);
        }
        shed
    }

    /// Swap expired idle workers for fresh candidates.
    async fn rotate_expired(&mut self, spawned: &mut Vec<Symbol>) -> Vec<Symbol> {
        let expired: Vec<(Symbol, Duration)> = self
            .registry
            .oldest_first()
            .into_iter()
            .filter(|(symbol, dwell)| !self.must_run.contains(symbol) && *dwell > self.settings.threshold)
            .take(self.settings.max_rotations_per_tick)
            .collect();

        let mut retired = Vec::new();
        for (old, dwell) in expired {
            let Some(replacement) = self.next_candidate(Some(&old)) else {
                debug!(symbol = %old, "No idle candidate to rotate in");
                break;
            };

            info!(
                from = %old,
                to = %replacement,
                dwell_secs = dwell.as_secs(),
                "🔄 [ROTATE] Rotating symbol"
            );
            self.retire(&old, RotationEvent::Retired).await;
            self.queue.remove(&old);
            retired.push(old);

            if self.spawn(&replacement) {
                spawned.push(replacement);
            }
        }
        retired
    }

    /// Next queued symbol with no worker and no straggler.
    fn next_candidate(&mut self, exclude: Option<&Symbol>) -> Option<Symbol> {
        let registry = &self.registry;
        let stragglers = &self.stragglers;
        self.queue.next_available(|symbol| {
            Some(symbol) != exclude
                && !registry.contains(symbol)
                && !stragglers.iter().any(|h| h.symbol() == symbol)
        })
    }

    fn is_straggling(&self, symbol: &Symbol) -> bool {
        self.stragglers.iter().any(|h| h.symbol() == symbol)
    }

    /// Spawn a worker if none exists. Failures are logged and retried next tick.
    fn spawn(&self, symbol: &Symbol) -> bool {
        match self.registry.try_spawn(symbol, self.factory.as_ref()) {
            Ok(true) => {
                info!(%symbol, "🚀 [WORKER] Worker started");
                self.record(symbol, RotationEvent::Started, "");
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(%symbol, error = ?e, "Failed to start worker");
                false
            }
        }
    }

    /// Stop a worker, waiting up to the grace period.
    async fn retire(&mut self, symbol: &Symbol, event: RotationEvent) {
        let Some(handle) = self.registry.take(symbol) else {
            return;
        };
        let dwell = handle.dwell();
        self.record(symbol, event, &format!("dwell {}s", dwell.as_secs()));

        if let Some(straggler) = handle.shutdown(self.settings.grace).await {
            self.stragglers.push(straggler);
        }
    }

    /// Stop every worker, aborting any that outlive the grace period.
    pub async fn shutdown_all(&mut self) {
        let handles = self.registry.drain();
        info!(workers = handles.len(), "🛑 Stopping all workers");

        for handle in &handles {
            handle.request_stop();
        }
        for handle in handles {
            if let Some(straggler) = handle.shutdown(self.settings.grace).await {
                warn!(symbol = %straggler.symbol(), "Aborting worker");
                straggler.abort();
            }
        }
        for straggler in self.stragglers.drain(..) {
            straggler.abort();
        }
    }

    fn record(&self, symbol: &Symbol, event: RotationEvent, detail: &str) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_rotation(symbol, event, detail) {
                warn!(%symbol, error = %e, "Failed to journal rotation event");
            }
        }
    }
}

fn sorted(symbols: &HashSet<Symbol>) -> Vec<Symbol> {
    let mut list: Vec<Symbol> = symbols.iter().cloned().collect();
    list.sort();
    list
}
