//! Update records written by the execution layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{RequestId, Time};

/// Opaque version token reported with a materialization or observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVersion(pub String);

impl DataVersion {
    /// Create a new data version.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest known update of one asset partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Last time the partition was materialized
    pub last_materialized_at: Option<Time>,

    /// Last time an observation reported new data
    pub last_observed_at: Option<Time>,

    /// Latest reported data version
    pub data_version: Option<DataVersion>,
}

impl UpdateRecord {
    /// Record of a single materialization.
    pub fn materialized(at: Time) -> Self {
        Self {
            last_materialized_at: Some(at),
            ..Default::default()
        }
    }

    /// Latest of the materialization and observation timestamps.
    pub fn last_updated_at(&self) -> Option<Time> {
        match (self.last_materialized_at, self.last_observed_at) {
            (Some(m), Some(o)) => Some(m.max(o)),
            (m, o) => m.or(o),
        }
    }

    /// Apply a materialization. Timestamps never move backwards.
    pub fn apply_materialization(&mut self, at: Time, data_version: Option<DataVersion>) -> bool {
        if self.last_materialized_at.is_some_and(|prev| prev > at) {
            return false;
        }
        self.last_materialized_at = Some(at);
        if data_version.is_some() {
            self.data_version = data_version;
        }
        true
    }

    /// Apply an observation.
    ///
    /// Only a new data version (or a first observation without one) advances
    /// the observed timestamp. Returns whether the record changed.
    pub fn apply_observation(&mut self, at: Time, data_version: Option<DataVersion>) -> bool {
        if self.last_observed_at.is_some_and(|prev| prev > at) {
            return false;
        }
        let unchanged = match (&data_version, &self.data_version) {
            (Some(new), Some(old)) => new == old,
            (None, _) => self.last_observed_at.is_some(),
            (Some(_), None) => false,
        };
        if unchanged {
            return false;
        }
        self.last_observed_at = Some(at);
        if data_version.is_some() {
            self.data_version = data_version;
        }
        true
    }
}

/// The last request dispatched for a partition.
///
/// Serves as the in-flight marker and as the "last cron tick satisfied"
/// cursor: a cron rule never fires twice for ticks at or before
/// `requested_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMarker {
    /// Dispatched request
    pub request_id: RequestId,

    /// When the request was handed to the execution layer
    pub requested_at: Time,
}

impl RequestMarker {
    /// Create a marker for a request dispatched at `requested_at`.
    pub fn new(request_id: RequestId, requested_at: Time) -> Self {
        Self {
            request_id,
            requested_at,
        }
    }

    /// Whether the request has not yet been satisfied by a materialization
    /// and is younger than `expiry`.
    pub fn is_outstanding(
        &self,
        record: Option<&UpdateRecord>,
        now: Time,
        expiry: chrono::Duration,
    ) -> bool {
        let satisfied = record
            .and_then(|r| r.last_materialized_at)
            .is_some_and(|m| m >= self.requested_at);
        !satisfied && now - self.requested_at < expiry
    }
}
