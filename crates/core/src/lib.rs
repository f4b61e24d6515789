//! automat core data models.
//!
//! This crate defines the asset graph, partitions, update records, freshness
//! check definitions and the evaluation/request types shared by the policy
//! evaluator, the update index and the scheduling harness.

#![warn(missing_docs)]

// Core identities
mod id;
mod asset;

// Graph definition
mod partition;
mod mapping;
mod graph;

// Runtime state
mod record;
mod evaluation;
mod request;

// Checks and sensors
mod check;
mod binding;

mod error;

// Re-exports
pub use id::*;
pub use asset::{AssetKey, PartitionKey, AssetPartition};

// Graph
pub use partition::{PartitionsDefinition, DAILY_FORMAT, HOURLY_FORMAT};
pub use mapping::PartitionMapping;
pub use graph::{AssetGraph, AssetGraphBuilder, AssetNode, DependencyEdge};

// Records & evaluations
pub use record::{UpdateRecord, DataVersion, RequestMarker};
pub use evaluation::{Decision, EvaluationResult, TickRecord};
pub use request::{MaterializationRequest, PROVENANCE_TAG, PROVENANCE_VALUE, BINDING_TAG, TICK_TAG};

// Checks & bindings
pub use check::{
    FreshnessCheckSpec, CheckTarget, FreshnessCriteria, CheckSeverity, CheckStatus, CheckResult,
};
pub use binding::{SensorBinding, SensorBindings, DEFAULT_BINDING_NAME, DEFAULT_MINIMUM_INTERVAL_SECONDS};

pub use error::DefinitionError;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
