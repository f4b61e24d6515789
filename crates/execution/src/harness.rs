//! Scheduling harness: one tick loop per sensor binding.
//!
//! Every binding runs in its own tokio task and every tick in a spawned task
//! of its own, so a panic or fatal error disables that binding only. The
//! freshness runner, when enabled, is one more independent task reading the
//! same index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use automat_core::Time;
use automat_freshness::FreshnessRunner;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{BindingState, SensorEngine, StatusBoard, TickError, TickResult};

/// Drives the sensor engine on each binding's cadence.
pub struct SchedulingHarness {
    engine: Arc<SensorEngine>,
    statuses: StatusBoard,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    run_freshness: bool,
}

impl SchedulingHarness {
    /// Create a harness around an engine.
    pub fn new(engine: SensorEngine) -> Self {
        let statuses = StatusBoard::new();
        let engine = engine.with_status_board(statuses.clone());
        let (shutdown, _) = watch::channel(false);
        Self {
            engine: Arc::new(engine),
            statuses,
            shutdown,
            handles: Vec::new(),
            run_freshness: true,
        }
    }

    /// Enable or disable the freshness runner.
    pub fn with_freshness(mut self, enabled: bool) -> Self {
        self.run_freshness = enabled;
        self
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Arc<SensorEngine> {
        &self.engine
    }

    /// Current state of every binding.
    pub async fn statuses(&self) -> BTreeMap<String, BindingState> {
        self.statuses.snapshot().await
    }

    /// Run one tick of every enabled binding at `now`, each isolated from
    /// the others. Fatal errors and panics disable the binding.
    pub async fn tick_once(&self, now: Time) -> BTreeMap<String, Result<TickResult, TickError>> {
        let mut results = BTreeMap::new();
        for name in self.binding_names() {
            if self.statuses.get(&name).await.is_some_and(|s| s.is_disabled()) {
                continue;
            }
            let result = run_isolated(&self.engine, &name, now).await;
            settle(&self.statuses, &name, &result).await;
            results.insert(name, result);
        }
        results
    }

    /// Spawn the binding loops and the freshness runner.
    pub fn start(&mut self) {
        for binding in self.engine.definitions().bindings().iter() {
            let interval = Duration::from_secs(binding.minimum_interval_seconds.max(1));
            info!(
                "Starting sensor {} over {} asset(s) every {}s",
                binding.name,
                binding.assets.len(),
                interval.as_secs()
            );
            self.handles.push(tokio::spawn(binding_loop(
                Arc::clone(&self.engine),
                self.statuses.clone(),
                binding.name.clone(),
                interval,
                self.shutdown.subscribe(),
            )));
        }

        let definitions = self.engine.definitions();
        if self.run_freshness && !definitions.checks().is_empty() {
            let runner = FreshnessRunner::new(
                Arc::clone(self.engine.index()),
                Arc::clone(definitions.graph()),
                Arc::clone(definitions.checks()),
            )
            .with_interval(definitions.config().freshness_interval());
            let shutdown = self.shutdown.subscribe();
            self.handles.push(tokio::spawn(async move { runner.run(shutdown).await }));
        }
    }

    /// Signal every loop to stop and wait for in-progress ticks to finish.
    pub async fn shutdown(mut self) {
        info!("Shutting down scheduling harness");
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Harness task ended abnormally: {}", e);
            }
        }
    }

    fn binding_names(&self) -> Vec<String> {
        self.engine
            .definitions()
            .bindings()
            .iter()
            .map(|b| b.name.clone())
            .collect()
    }
}

/// Run one tick in its own task; a panic becomes a fatal error.
async fn run_isolated(engine: &Arc<SensorEngine>, binding: &str, now: Time) -> Result<TickResult, TickError> {
    let engine = Arc::clone(engine);
    let name = binding.to_string();
    match tokio::spawn(async move { engine.run_tick(&name, now).await }).await {
        Ok(result) => result,
        Err(e) => Err(TickError::Fatal(format!("tick panicked: {}", e))),
    }
}

/// Move the binding back to idle, or disable it after a fatal error.
async fn settle(statuses: &StatusBoard, binding: &str, result: &Result<TickResult, TickError>) {
    match result {
        Ok(_) => statuses.set(binding, BindingState::Idle).await,
        Err(e) if e.is_fatal() => {
            error!("Disabling sensor {}: {}", binding, e);
            statuses
                .set(
                    binding,
                    BindingState::Disabled {
                        reason: e.to_string(),
                    },
                )
                .await;
        }
        Err(e) => {
            warn!("Tick for {} failed, retrying next interval: {}", binding, e);
            statuses.set(binding, BindingState::Idle).await;
        }
    }
}

async fn binding_loop(
    engine: Arc<SensorEngine>,
    statuses: StatusBoard,
    name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    statuses.set(&name, BindingState::Idle).await;
    let interval_chrono = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::seconds(30));

    // Resume the cadence from the last persisted tick.
    let mut next = match engine.index().last_tick(&name).await {
        Ok(Some(last)) => last.started_at + interval_chrono,
        Ok(None) => Utc::now(),
        Err(e) => {
            warn!("Could not read last tick for {}: {}", name, e);
            Utc::now()
        }
    };

    loop {
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Sensor {} stopping", name);
                    return;
                }
                continue;
            }
        }

        let now = Utc::now();
        next = now + interval_chrono;

        let result = run_isolated(&engine, &name, now).await;
        settle(&statuses, &name, &result).await;
        if result.as_ref().is_err_and(TickError::is_fatal) {
            return;
        }
    }
}
