//! In-memory index backend.

use async_trait::async_trait;
use automat_core::{
    AssetPartition, CheckResult, DataVersion, RequestMarker, TickRecord, Time, UpdateRecord,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::state::IndexState;
use crate::{IndexSnapshot, Result, UpdateIndex};

/// Index held entirely in memory. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: RwLock<IndexState>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpdateIndex for MemoryIndex {
    async fn last_update(&self, asset_partition: &AssetPartition) -> Result<Option<UpdateRecord>> {
        Ok(self.state.read().await.last_update(asset_partition))
    }

    async fn update_history(&self, asset_partition: &AssetPartition) -> Result<Vec<Time>> {
        Ok(self.state.read().await.update_history(asset_partition))
    }

    async fn record_materialization(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()> {
        let changed = self
            .state
            .write()
            .await
            .apply_materialization(asset_partition, at, data_version);
        debug!("Recorded materialization of {} at {} (changed: {})", asset_partition, at, changed);
        Ok(())
    }

    async fn record_observation(
        &self,
        asset_partition: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> Result<()> {
        let changed = self
            .state
            .write()
            .await
            .apply_observation(asset_partition, at, data_version);
        debug!("Recorded observation of {} at {} (changed: {})", asset_partition, at, changed);
        Ok(())
    }

    async fn record_request(&self, asset_partition: &AssetPartition, marker: RequestMarker) -> Result<()> {
        self.state.write().await.record_request(asset_partition, marker);
        Ok(())
    }

    async fn save_check_result(&self, result: &CheckResult) -> Result<()> {
        self.state.write().await.save_check_result(result);
        Ok(())
    }

    async fn check_results(&self) -> Result<Vec<CheckResult>> {
        Ok(self.state.read().await.check_results())
    }

    async fn save_tick(&self, record: &TickRecord) -> Result<()> {
        self.state.write().await.save_tick(record);
        Ok(())
    }

    async fn last_tick(&self, binding: &str) -> Result<Option<TickRecord>> {
        Ok(self.state.read().await.recent_ticks(binding, 1).pop())
    }

    async fn recent_ticks(&self, binding: &str, limit: usize) -> Result<Vec<TickRecord>> {
        Ok(self.state.read().await.recent_ticks(binding, limit))
    }

    async fn snapshot(&self) -> Result<IndexSnapshot> {
        Ok(self.state.read().await.snapshot(chrono::Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automat_core::{CheckSeverity, CheckStatus, RequestId, TickId};

    fn t(s: &str) -> Time {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let index = MemoryIndex::new();
        let ap = AssetPartition::new("events", "2024-01-01");

        assert!(index.last_update(&ap).await.unwrap().is_none());

        index
            .record_materialization(&ap, t("2024-01-02T00:00:00Z"), Some(DataVersion::new("v1")))
            .await
            .unwrap();

        let record = index.last_update(&ap).await.unwrap().unwrap();
        assert_eq!(record.last_materialized_at, Some(t("2024-01-02T00:00:00Z")));
        assert_eq!(record.data_version, Some(DataVersion::new("v1")));
        assert_eq!(index.update_history(&ap).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_writes() {
        let index = MemoryIndex::new();
        let ap = AssetPartition::unpartitioned("orders");

        let snapshot = index.snapshot().await.unwrap();
        index
            .record_materialization(&ap, t("2024-01-02T00:00:00Z"), None)
            .await
            .unwrap();

        assert!(!snapshot.has_record(&ap));
        assert!(index.snapshot().await.unwrap().has_record(&ap));
    }

    #[tokio::test]
    async fn test_requests_and_checks_in_snapshot() {
        let index = MemoryIndex::new();
        let ap = AssetPartition::unpartitioned("orders");
        let marker = RequestMarker::new(RequestId::new(), t("2024-01-02T00:00:00Z"));

        index.record_request(&ap, marker.clone()).await.unwrap();
        index
            .save_check_result(&CheckResult {
                check: "orders_fresh".into(),
                asset_partition: ap.clone(),
                status: CheckStatus::Overdue,
                severity: CheckSeverity::Error,
                blocking: true,
                evaluated_at: t("2024-01-02T00:00:00Z"),
                last_updated_at: None,
                description: "never updated".into(),
            })
            .await
            .unwrap();

        let snapshot = index.snapshot().await.unwrap();
        assert_eq!(snapshot.request_marker(&ap), Some(&marker));
        assert!(snapshot.latest_check_result(&ap, "orders_fresh").unwrap().blocks_downstream());
    }

    #[tokio::test]
    async fn test_ticks_newest_first() {
        let index = MemoryIndex::new();
        for minute in 0..3 {
            let at = t("2024-01-01T00:00:00Z") + chrono::Duration::minutes(minute);
            index
                .save_tick(&TickRecord {
                    tick_id: TickId::new(),
                    binding: "default".into(),
                    started_at: at,
                    finished_at: at,
                    evaluations: vec![],
                    dispatched: vec![],
                    failed: vec![],
                })
                .await
                .unwrap();
        }

        let last = index.last_tick("default").await.unwrap().unwrap();
        assert_eq!(last.started_at, t("2024-01-01T00:02:00Z"));
        assert_eq!(index.recent_ticks("default", 10).await.unwrap().len(), 3);
        assert!(index.last_tick("other").await.unwrap().is_none());
    }
}
