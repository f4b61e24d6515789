//! Materialization requests handed to the execution layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{AssetPartition, RequestId, TickId, Time};

/// Tag marking requests emitted by the automation scheduler.
pub const PROVENANCE_TAG: &str = "automat/provenance";

/// Value of [`PROVENANCE_TAG`].
pub const PROVENANCE_VALUE: &str = "auto_materialize";

/// Tag carrying the emitting sensor binding.
pub const BINDING_TAG: &str = "automat/binding";

/// Tag carrying the emitting tick.
pub const TICK_TAG: &str = "automat/tick";

/// A request to materialize one asset partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRequest {
    /// Unique identifier
    pub id: RequestId,

    /// Tick that produced the request
    pub tick_id: TickId,

    /// Partition to materialize
    pub asset_partition: AssetPartition,

    /// Materialize rules that fired
    pub triggering_rules: Vec<String>,

    /// Provenance tags
    pub tags: BTreeMap<String, String>,

    /// When the request was built
    pub requested_at: Time,
}

impl MaterializationRequest {
    /// Build a request carrying the standard provenance tags.
    pub fn new(
        tick_id: TickId,
        binding: &str,
        asset_partition: AssetPartition,
        triggering_rules: Vec<String>,
        requested_at: Time,
    ) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(PROVENANCE_TAG.to_string(), PROVENANCE_VALUE.to_string());
        tags.insert(BINDING_TAG.to_string(), binding.to_string());
        tags.insert(TICK_TAG.to_string(), tick_id.to_string());

        Self {
            id: RequestId::new(),
            tick_id,
            asset_partition,
            triggering_rules,
            tags,
            requested_at,
        }
    }

    /// Whether the request was emitted by the scheduler.
    pub fn is_automated(&self) -> bool {
        self.tags.get(PROVENANCE_TAG).map(String::as_str) == Some(PROVENANCE_VALUE)
    }
}
