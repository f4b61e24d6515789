//! Evaluation results and tick records.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AssetPartition, RequestId, TickId, Time};

/// Final decision for one asset partition on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Request a materialization
    Materialize,
    /// At least one skip rule vetoed
    Skip,
    /// Nothing to do
    NoOp,
}

impl Decision {
    /// Combine fired rule classes: any skip vetoes, otherwise any materialize wins.
    pub fn from_votes(materialize_fired: bool, skip_fired: bool) -> Self {
        match (materialize_fired, skip_fired) {
            (_, true) => Self::Skip,
            (true, false) => Self::Materialize,
            (false, false) => Self::NoOp,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Materialize => write!(f, "materialize"),
            Decision::Skip => write!(f, "skip"),
            Decision::NoOp => write!(f, "no-op"),
        }
    }
}

/// Outcome of evaluating a policy against one asset partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Evaluated partition
    pub asset_partition: AssetPartition,

    /// Materialize rules that fired, in policy order
    pub materialize_rules: Vec<String>,

    /// Skip rules that fired, in policy order
    pub skip_rules: Vec<String>,

    /// Final decision
    pub decision: Decision,

    /// A request for this partition is still outstanding
    #[serde(default)]
    pub in_flight: bool,

    /// Candidate dropped by the per-tick rate limit
    #[serde(default)]
    pub discarded_by_rate_limit: bool,
}

impl EvaluationResult {
    /// Whether this partition was selected for materialization.
    pub fn is_requested(&self) -> bool {
        self.decision == Decision::Materialize
    }
}

/// Persisted summary of one binding tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRecord {
    /// Tick identifier
    pub tick_id: TickId,

    /// Sensor binding that ran the tick
    pub binding: String,

    /// When evaluation started
    pub started_at: Time,

    /// When dispatching finished
    pub finished_at: Time,

    /// Per-partition results (may be empty when evaluations are not persisted)
    #[serde(default)]
    pub evaluations: Vec<EvaluationResult>,

    /// Requests accepted by the execution layer
    #[serde(default)]
    pub dispatched: Vec<RequestId>,

    /// Partitions whose dispatch failed or timed out
    #[serde(default)]
    pub failed: Vec<AssetPartition>,
}
