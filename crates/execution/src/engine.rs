//! The sensor engine: one tick of one binding.
//!
//! ```text
//! Snapshot index → Evaluate policies → Rate limit → Dispatch → Record tick
//! ```

use std::sync::Arc;
use std::time::Instant;

use automat_core::{
    AssetPartition, EvaluationResult, MaterializationRequest, RequestMarker, SensorBinding, TickId, TickRecord, Time,
};
use automat_policy::{EvaluationContext, PolicyEvaluator};
use automat_storage::{IndexSnapshot, UpdateIndex};
use tracing::{debug, info, warn};

use crate::{BindingState, Definitions, RequestDispatcher, StatusBoard, TickError};

/// Result of one tick.
#[derive(Debug, Clone)]
pub struct TickResult {
    /// Persisted tick summary
    pub record: TickRecord,

    /// Requests accepted by the dispatcher
    pub requests: Vec<MaterializationRequest>,
}

/// A partition chosen for materialization and the rules that chose it.
struct Candidate {
    asset_partition: AssetPartition,
    rules: Vec<String>,
}

/// Runs ticks for sensor bindings.
pub struct SensorEngine {
    definitions: Definitions,
    index: Arc<dyn UpdateIndex>,
    dispatcher: Arc<dyn RequestDispatcher>,
    evaluator: PolicyEvaluator,
    statuses: StatusBoard,
}

impl SensorEngine {
    /// Create an engine.
    pub fn new(
        definitions: Definitions,
        index: Arc<dyn UpdateIndex>,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> Self {
        let evaluator = PolicyEvaluator::new().with_request_expiry(definitions.config().request_expiry());
        Self {
            definitions,
            index,
            dispatcher,
            evaluator,
            statuses: StatusBoard::new(),
        }
    }

    /// Report binding states to a shared board.
    pub fn with_status_board(mut self, statuses: StatusBoard) -> Self {
        self.statuses = statuses;
        self
    }

    /// Loaded definitions.
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    /// Update index.
    pub fn index(&self) -> &Arc<dyn UpdateIndex> {
        &self.index
    }

    /// Binding state board.
    pub fn statuses(&self) -> &StatusBoard {
        &self.statuses
    }

    /// Run one tick of `binding` at `now`.
    pub async fn run_tick(&self, binding: &str, now: Time) -> Result<TickResult, TickError> {
        let binding = self
            .definitions
            .bindings()
            .get(binding)
            .ok_or_else(|| TickError::Fatal(format!("unknown sensor binding '{}'", binding)))?;
        let tick_id = TickId::new();
        let started = Instant::now();

        info!("Starting tick {} for {}", tick_id, binding.name);
        self.statuses.set(&binding.name, BindingState::Evaluating).await;

        let snapshot = self.index.snapshot().await?;
        let (evaluations, candidates) = self.evaluate(binding, &snapshot, now)?;

        self.statuses.set(&binding.name, BindingState::Dispatching).await;

        let timeout = self.definitions.config().dispatch_timeout();
        let mut requests = Vec::new();
        let mut failed = Vec::new();
        let mut marker_error = None;

        for candidate in candidates {
            let request = MaterializationRequest::new(
                tick_id,
                &binding.name,
                candidate.asset_partition,
                candidate.rules,
                now,
            );

            match tokio::time::timeout(timeout, self.dispatcher.dispatch(&request)).await {
                Ok(Ok(())) => {
                    // The request is out; a lost marker only risks a duplicate next tick.
                    if let Err(e) = self
                        .index
                        .record_request(&request.asset_partition, RequestMarker::new(request.id, now))
                        .await
                    {
                        warn!("Could not record request marker for {}: {}", request.asset_partition, e);
                        if marker_error.is_none() {
                            marker_error = Some(e);
                        }
                    }
                    debug!("Dispatched {} for {}", request.id, request.asset_partition);
                    requests.push(request);
                }
                Ok(Err(e)) => {
                    warn!("Dispatch of {} failed: {}", request.asset_partition, e);
                    failed.push(request.asset_partition);
                }
                Err(_) => {
                    warn!(
                        "Dispatch of {} timed out after {}ms",
                        request.asset_partition,
                        timeout.as_millis()
                    );
                    failed.push(request.asset_partition);
                }
            }
        }

        let elapsed = chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        let record = TickRecord {
            tick_id,
            binding: binding.name.clone(),
            started_at: now,
            finished_at: now + elapsed,
            evaluations: if self.definitions.config().persist_evaluations {
                evaluations
            } else {
                Vec::new()
            },
            dispatched: requests.iter().map(|r| r.id).collect(),
            failed,
        };
        self.index.save_tick(&record).await?;

        info!(
            "Tick {} for {}: {} requested, {} failed",
            tick_id,
            binding.name,
            record.dispatched.len(),
            record.failed.len()
        );
        if let Some(e) = marker_error {
            return Err(e.into());
        }
        Ok(TickResult { record, requests })
    }

    /// Evaluate every asset of the binding in dependency order.
    ///
    /// Kept synchronous: the evaluation context memoizes through interior
    /// mutability and must not live across an await point.
    fn evaluate(
        &self,
        binding: &SensorBinding,
        snapshot: &IndexSnapshot,
        now: Time,
    ) -> Result<(Vec<EvaluationResult>, Vec<Candidate>), TickError> {
        let graph = self.definitions.graph();
        for asset in &binding.assets {
            if !graph.contains(asset) {
                return Err(TickError::Fatal(format!(
                    "binding '{}' targets unknown asset '{}'",
                    binding.name, asset
                )));
            }
        }

        let ctx = EvaluationContext::new(graph, snapshot, self.definitions.checks(), now);
        let mut evaluations = Vec::new();
        let mut candidates = Vec::new();

        for asset in graph.topological_order().iter().filter(|a| binding.assets.contains(*a)) {
            let policy = self
                .definitions
                .policy(asset)
                .ok_or_else(|| TickError::Fatal(format!("asset '{}' has no automation policy", asset)))?;

            let evaluation = self.evaluator.evaluate_asset(&ctx, asset, policy);
            for asset_partition in evaluation.selected {
                let rules = evaluation
                    .results
                    .iter()
                    .find(|r| r.asset_partition == asset_partition)
                    .map(|r| r.materialize_rules.clone())
                    .unwrap_or_default();
                candidates.push(Candidate { asset_partition, rules });
            }
            evaluations.extend(evaluation.results);
        }

        Ok((evaluations, candidates))
    }
}
