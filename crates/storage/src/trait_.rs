//! Update-time index abstraction.

use async_trait::async_trait;
use automat_core::{
    AssetPartition, CheckResult, DataVersion, RequestMarker, TickRecord, Time, UpdateRecord,
};

use crate::IndexSnapshot;

/// Error type for index operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Per-partition record of updates, request markers, check results and
/// tick history.
///
/// Writes to update records come exclusively from the execution layer
/// (`record_materialization` / `record_observation`). The scheduler only
/// reads them, through [`UpdateIndex::snapshot`].
#[async_trait]
pub trait UpdateIndex: Send + Sync {
    // === Update records ===

    /// Latest update of a partition, if it was ever materialized or observed.
    async fn last_update(&self, asset_partition: &AssetPartition) -> Result<Option<UpdateRecord>>;

    /// Accepted update times of a partition, oldest first.
    async fn update_history(&self, asset_partition: &AssetPartition) -> Result<Vec<Time>>;

    /// Record a completed materialization.
    async fn record_materialization(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()>;

    /// Record an observation of externally produced data.
    async fn record_observation(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()>;

    // === Scheduler state ===

    /// Remember the last request dispatched for a partition.
    async fn record_request(&self, asset_partition: &AssetPartition, marker: RequestMarker) -> Result<()>;

    /// Store the latest result of a check.
    async fn save_check_result(&self, result: &CheckResult) -> Result<()>;

    /// Latest results of every check.
    async fn check_results(&self) -> Result<Vec<CheckResult>>;

    /// Append a tick record.
    async fn save_tick(&self, record: &TickRecord) -> Result<()>;

    /// Most recent tick of a binding.
    async fn last_tick(&self, binding: &str) -> Result<Option<TickRecord>>;

    /// Most recent ticks of a binding, newest first.
    async fn recent_ticks(&self, binding: &str, limit: usize) -> Result<Vec<TickRecord>>;

    // === Snapshots ===

    /// Point-in-time copy of the whole index.
    async fn snapshot(&self) -> Result<IndexSnapshot>;
}
