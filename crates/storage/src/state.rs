//! In-memory index state shared by the memory and JSON backends.

use std::collections::{BTreeMap, HashMap, VecDeque};

use automat_core::{
    AssetPartition, CheckResult, DataVersion, RequestMarker, TickRecord, Time, UpdateRecord,
};
use serde::{Deserialize, Serialize};

use crate::IndexSnapshot;

/// Update times kept per partition.
pub const HISTORY_LIMIT: usize = 256;

/// Tick records kept per binding.
pub const TICK_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub(crate) struct IndexState {
    records: HashMap<AssetPartition, UpdateRecord>,
    history: HashMap<AssetPartition, VecDeque<Time>>,
    requests: HashMap<AssetPartition, RequestMarker>,
    checks: HashMap<AssetPartition, BTreeMap<String, CheckResult>>,
    ticks: BTreeMap<String, VecDeque<TickRecord>>,
}

impl IndexState {
    pub(crate) fn last_update(&self, ap: &AssetPartition) -> Option<UpdateRecord> {
        self.records.get(ap).cloned()
    }

    pub(crate) fn update_history(&self, ap: &AssetPartition) -> Vec<Time> {
        self.history
            .get(ap)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns whether the record changed.
    pub(crate) fn apply_materialization(
        &mut self,
        ap: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> bool {
        let changed = self
            .records
            .entry(ap.clone())
            .or_default()
            .apply_materialization(at, data_version);
        if changed {
            self.push_history(ap, at);
        }
        changed
    }

    /// Returns whether the record changed.
    pub(crate) fn apply_observation(
        &mut self,
        ap: &AssetPartition,
        at: Time,
        data_version: Option<DataVersion>,
    ) -> bool {
        let mut record = self.records.get(ap).cloned().unwrap_or_default();
        let changed = record.apply_observation(at, data_version);
        if changed {
            self.records.insert(ap.clone(), record);
            self.push_history(ap, at);
        }
        changed
    }

    fn push_history(&mut self, ap: &AssetPartition, at: Time) {
        let history = self.history.entry(ap.clone()).or_default();
        history.push_back(at);
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    pub(crate) fn record_request(&mut self, ap: &AssetPartition, marker: RequestMarker) {
        self.requests.insert(ap.clone(), marker);
    }

    pub(crate) fn save_check_result(&mut self, result: &CheckResult) {
        self.checks
            .entry(result.asset_partition.clone())
            .or_default()
            .insert(result.check.clone(), result.clone());
    }

    pub(crate) fn check_results(&self) -> Vec<CheckResult> {
        self.checks
            .values()
            .flat_map(|by_name| by_name.values().cloned())
            .collect()
    }

    pub(crate) fn save_tick(&mut self, record: &TickRecord) {
        let ticks = self.ticks.entry(record.binding.clone()).or_default();
        ticks.push_front(record.clone());
        ticks.truncate(TICK_LIMIT);
    }

    pub(crate) fn recent_ticks(&self, binding: &str, limit: usize) -> Vec<TickRecord> {
        self.ticks
            .get(binding)
            .map(|t| t.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self, taken_at: Time) -> IndexSnapshot {
        IndexSnapshot::from_parts(
            taken_at,
            self.records.clone(),
            self.history
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
            self.requests.clone(),
            self.checks
                .iter()
                .map(|(k, v)| (k.clone(), v.values().cloned().collect()))
                .collect(),
        )
    }
}

/// On-disk layout of the index.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct PersistedState {
    #[serde(default)]
    partitions: Vec<PartitionEntry>,
    #[serde(default)]
    checks: Vec<CheckResult>,
    #[serde(default)]
    ticks: Vec<TickRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionEntry {
    asset_partition: AssetPartition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<UpdateRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request: Option<RequestMarker>,
}

impl From<&IndexState> for PersistedState {
    fn from(state: &IndexState) -> Self {
        let mut keys: Vec<&AssetPartition> = state
            .records
            .keys()
            .chain(state.requests.keys())
            .collect();
        keys.sort();
        keys.dedup();

        let partitions = keys
            .into_iter()
            .map(|ap| PartitionEntry {
                asset_partition: ap.clone(),
                record: state.records.get(ap).cloned(),
                history: state.update_history(ap),
                request: state.requests.get(ap).cloned(),
            })
            .collect();

        // Oldest first so that replaying through save_tick restores order.
        let ticks = state
            .ticks
            .values()
            .flat_map(|t| t.iter().rev().cloned())
            .collect();

        Self {
            partitions,
            checks: state.check_results(),
            ticks,
        }
    }
}

impl From<PersistedState> for IndexState {
    fn from(persisted: PersistedState) -> Self {
        let mut state = IndexState::default();
        for entry in persisted.partitions {
            let ap = entry.asset_partition;
            if let Some(record) = entry.record {
                state.records.insert(ap.clone(), record);
            }
            if !entry.history.is_empty() {
                state.history.insert(ap.clone(), entry.history.into());
            }
            if let Some(marker) = entry.request {
                state.requests.insert(ap, marker);
            }
        }
        for result in &persisted.checks {
            state.save_check_result(result);
        }
        for tick in &persisted.ticks {
            state.save_tick(tick);
        }
        state
    }
}
