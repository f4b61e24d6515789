//! Immutable point-in-time view of the index.
//!
//! Every rule evaluated during one tick reads the same snapshot, so a run that
//! completes mid-tick cannot change the outcome of that tick.

use std::collections::HashMap;

use automat_core::{AssetPartition, CheckResult, RequestMarker, Time, UpdateRecord};
use chrono::Duration;

/// Owned copy of index state taken at `taken_at`.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    taken_at: Time,
    records: HashMap<AssetPartition, UpdateRecord>,
    history: HashMap<AssetPartition, Vec<Time>>,
    requests: HashMap<AssetPartition, RequestMarker>,
    checks: HashMap<AssetPartition, Vec<CheckResult>>,
}

impl IndexSnapshot {
    /// Snapshot of an empty index.
    pub fn empty(taken_at: Time) -> Self {
        Self {
            taken_at,
            records: HashMap::new(),
            history: HashMap::new(),
            requests: HashMap::new(),
            checks: HashMap::new(),
        }
    }

    /// Add or replace an update record.
    pub fn with_record(mut self, asset_partition: AssetPartition, record: UpdateRecord) -> Self {
        self.records.insert(asset_partition, record);
        self
    }

    /// Add a materialization at `at`.
    pub fn with_materialization(self, asset_partition: AssetPartition, at: Time) -> Self {
        self.with_record(asset_partition, UpdateRecord::materialized(at))
    }

    /// Set the update history of a partition.
    pub fn with_history(mut self, asset_partition: AssetPartition, history: Vec<Time>) -> Self {
        self.history.insert(asset_partition, history);
        self
    }

    /// Add a request marker.
    pub fn with_request(mut self, asset_partition: AssetPartition, marker: RequestMarker) -> Self {
        self.requests.insert(asset_partition, marker);
        self
    }

    /// Add a check result, replacing an earlier result of the same check.
    pub fn with_check_result(mut self, result: CheckResult) -> Self {
        let results = self.checks.entry(result.asset_partition.clone()).or_default();
        results.retain(|r| r.check != result.check);
        results.push(result);
        self
    }

    /// When the snapshot was taken.
    pub fn taken_at(&self) -> Time {
        self.taken_at
    }

    /// Latest update record.
    pub fn last_update(&self, asset_partition: &AssetPartition) -> Option<&UpdateRecord> {
        self.records.get(asset_partition)
    }

    /// Latest update time (materialization or observation).
    pub fn last_updated_at(&self, asset_partition: &AssetPartition) -> Option<Time> {
        self.records.get(asset_partition).and_then(UpdateRecord::last_updated_at)
    }

    /// Latest materialization time.
    pub fn last_materialized_at(&self, asset_partition: &AssetPartition) -> Option<Time> {
        self.records.get(asset_partition).and_then(|r| r.last_materialized_at)
    }

    /// Whether the partition was ever materialized or observed.
    pub fn has_record(&self, asset_partition: &AssetPartition) -> bool {
        self.records.contains_key(asset_partition)
    }

    /// Whether the partition was updated strictly after `since`.
    /// With no `since`, any update counts.
    pub fn updated_since(&self, asset_partition: &AssetPartition, since: Option<Time>) -> bool {
        match (self.last_updated_at(asset_partition), since) {
            (Some(updated), Some(since)) => updated > since,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Whether `upstream` holds data newer than the last update of `downstream`.
    pub fn is_newer_than(&self, upstream: &AssetPartition, downstream: &AssetPartition) -> bool {
        self.updated_since(upstream, self.last_updated_at(downstream))
    }

    /// Accepted update times, oldest first.
    pub fn update_history(&self, asset_partition: &AssetPartition) -> &[Time] {
        self.history
            .get(asset_partition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Last request dispatched for the partition.
    pub fn request_marker(&self, asset_partition: &AssetPartition) -> Option<&RequestMarker> {
        self.requests.get(asset_partition)
    }

    /// Request marker that is still waiting for its materialization.
    pub fn outstanding_request(
        &self,
        asset_partition: &AssetPartition,
        now: Time,
        expiry: Duration,
    ) -> Option<&RequestMarker> {
        self.requests
            .get(asset_partition)
            .filter(|m| m.is_outstanding(self.records.get(asset_partition), now, expiry))
    }

    /// Latest check results recorded against the partition.
    pub fn check_results(&self, asset_partition: &AssetPartition) -> &[CheckResult] {
        self.checks
            .get(asset_partition)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Latest result of a named check.
    pub fn latest_check_result(&self, asset_partition: &AssetPartition, check: &str) -> Option<&CheckResult> {
        self.check_results(asset_partition).iter().find(|r| r.check == check)
    }

    /// Number of partitions with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no partition has a record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn from_parts(
        taken_at: Time,
        records: HashMap<AssetPartition, UpdateRecord>,
        history: HashMap<AssetPartition, Vec<Time>>,
        requests: HashMap<AssetPartition, RequestMarker>,
        checks: HashMap<AssetPartition, Vec<CheckResult>>,
    ) -> Self {
        Self {
            taken_at,
            records,
            history,
            requests,
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automat_core::RequestId;

    fn t(s: &str) -> Time {
        s.parse().unwrap()
    }

    #[test]
    fn test_comparison_queries() {
        let a = AssetPartition::unpartitioned("a");
        let b = AssetPartition::unpartitioned("b");
        let c = AssetPartition::unpartitioned("c");
        let snap = IndexSnapshot::empty(t("2024-01-01T12:00:00Z"))
            .with_materialization(a.clone(), t("2024-01-01T10:00:00Z"))
            .with_materialization(b.clone(), t("2024-01-01T09:00:00Z"));

        assert!(snap.is_newer_than(&a, &b));
        assert!(!snap.is_newer_than(&b, &a));
        assert!(snap.is_newer_than(&a, &c));
        assert!(!snap.is_newer_than(&c, &a));
        assert!(!snap.updated_since(&a, Some(t("2024-01-01T10:00:00Z"))));
    }

    #[test]
    fn test_outstanding_request() {
        let a = AssetPartition::unpartitioned("a");
        let now = t("2024-01-01T12:00:00Z");
        let snap = IndexSnapshot::empty(now)
            .with_request(a.clone(), RequestMarker::new(RequestId::new(), t("2024-01-01T11:59:00Z")));

        assert!(snap.outstanding_request(&a, now, Duration::hours(1)).is_some());
        assert!(snap.outstanding_request(&a, now, Duration::seconds(30)).is_none());
    }
}
