//! Freshness check definitions and results.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AssetGraph, AssetKey, AssetPartition, Time};

/// What a freshness check looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTarget {
    /// The whole asset (its most recent partition for time-partitioned assets)
    Asset(AssetKey),
    /// A single partition
    Partition(AssetPartition),
}

/// How freshness is judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FreshnessCriteria {
    /// Must have been updated within `lower_bound_delta` of evaluation time
    LastUpdateWithin {
        /// Allowed staleness
        #[serde(with = "duration_secs")]
        lower_bound_delta: Duration,
    },
    /// Overdue when the gap since the last update is anomalous given history
    Anomaly {
        /// Updates needed before a verdict is possible
        #[serde(default = "default_min_history")]
        min_history: usize,
        /// Standard deviations above the mean interval tolerated
        #[serde(default = "default_sensitivity")]
        sensitivity: f64,
    },
}

fn default_min_history() -> usize {
    5
}

fn default_sensitivity() -> f64 {
    3.0
}

/// Severity attached to a failing check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    /// Reported, never blocks
    #[default]
    Warn,
    /// Reported as an error; blocks downstream when the check is blocking
    Error,
}

/// Declares a freshness expectation on an asset or partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessCheckSpec {
    /// Check name, unique per asset
    pub name: String,

    /// Checked asset or partition
    pub target: CheckTarget,

    /// Freshness criteria
    pub criteria: FreshnessCriteria,

    /// Severity when overdue
    #[serde(default)]
    pub severity: CheckSeverity,

    /// Whether an overdue error result should hold back downstream assets
    #[serde(default)]
    pub blocking: bool,
}

impl FreshnessCheckSpec {
    /// A deadline check: the asset must have been updated within `delta`.
    pub fn last_update_within(name: impl Into<String>, target: CheckTarget, delta: Duration) -> Self {
        Self {
            name: name.into(),
            target,
            criteria: FreshnessCriteria::LastUpdateWithin {
                lower_bound_delta: delta,
            },
            severity: CheckSeverity::default(),
            blocking: false,
        }
    }

    /// An anomaly-detection check over update history.
    pub fn anomaly(name: impl Into<String>, target: CheckTarget, min_history: usize, sensitivity: f64) -> Self {
        Self {
            name: name.into(),
            target,
            criteria: FreshnessCriteria::Anomaly {
                min_history,
                sensitivity,
            },
            severity: CheckSeverity::default(),
            blocking: false,
        }
    }

    /// Set severity.
    pub fn with_severity(mut self, severity: CheckSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Mark as blocking.
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    /// Asset the check belongs to.
    pub fn asset(&self) -> &AssetKey {
        match &self.target {
            CheckTarget::Asset(key) => key,
            CheckTarget::Partition(ap) => &ap.asset,
        }
    }

    /// Allowed staleness for deadline checks.
    pub fn lower_bound_delta(&self) -> Option<Duration> {
        match self.criteria {
            FreshnessCriteria::LastUpdateWithin { lower_bound_delta } => Some(lower_bound_delta),
            FreshnessCriteria::Anomaly { .. } => None,
        }
    }

    /// Partitions evaluated by this check at `now`.
    ///
    /// Asset targets resolve to the most recent partition of time-partitioned
    /// assets and to every partition of statically partitioned ones.
    pub fn target_partitions(&self, graph: &AssetGraph, now: Time) -> Vec<AssetPartition> {
        match &self.target {
            CheckTarget::Partition(ap) => vec![ap.clone()],
            CheckTarget::Asset(key) => match graph.partitions_def(key) {
                None => vec![AssetPartition::unpartitioned(key.clone())],
                Some(def) if def.is_time_based() => def
                    .last_partition(now)
                    .map(|p| vec![AssetPartition::new(key.clone(), p)])
                    .unwrap_or_default(),
                Some(_) => graph.asset_partitions(key, now),
            },
        }
    }
}

/// Outcome of a freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Updated recently enough
    Fresh,
    /// Not updated within the allowed window
    Overdue,
    /// Not enough information; passes with a warning
    Indeterminate,
}

impl CheckStatus {
    /// Overdue is the only failing status.
    pub fn passed(&self) -> bool {
        !matches!(self, CheckStatus::Overdue)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Fresh => write!(f, "fresh"),
            CheckStatus::Overdue => write!(f, "overdue"),
            CheckStatus::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Result of evaluating one check against one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check name
    pub check: String,

    /// Evaluated partition
    pub asset_partition: AssetPartition,

    /// Outcome
    pub status: CheckStatus,

    /// Severity copied from the check
    pub severity: CheckSeverity,

    /// Copied from the check
    #[serde(default)]
    pub blocking: bool,

    /// Evaluation time
    pub evaluated_at: Time,

    /// Last update seen
    pub last_updated_at: Option<Time>,

    /// Human-readable explanation
    pub description: String,
}

impl CheckResult {
    /// Whether this result should hold back downstream materializations.
    pub fn blocks_downstream(&self) -> bool {
        self.blocking && self.severity == CheckSeverity::Error && self.status == CheckStatus::Overdue
    }

    /// Whether the result still describes the partition: it has not been
    /// updated since the update this result saw.
    pub fn is_current(&self, last_updated_at: Option<Time>) -> bool {
        last_updated_at <= self.last_updated_at
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(d)?;
        if seconds < 0 {
            return Err(D::Error::custom(format!("duration must not be negative, got {}s", seconds)));
        }
        Duration::try_seconds(seconds)
            .ok_or_else(|| D::Error::custom(format!("duration of {}s is out of range", seconds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetNode, PartitionsDefinition};
    use chrono::NaiveDate;

    #[test]
    fn test_deserialize_deadline_check() {
        let json = r#"{
            "name": "orders_fresh",
            "target": {"asset": "orders"},
            "criteria": {"type": "last_update_within", "lower_bound_delta": 7200},
            "severity": "error",
            "blocking": true
        }"#;
        let spec: FreshnessCheckSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.asset().as_str(), "orders");
        assert_eq!(spec.lower_bound_delta(), Some(Duration::hours(2)));
        assert_eq!(spec.severity, CheckSeverity::Error);
        assert!(spec.blocking);
    }

    #[test]
    fn test_out_of_range_delta_is_a_load_error() {
        for delta in [i64::MAX.to_string(), "-60".to_string()] {
            let json = format!(
                r#"{{"name": "x", "target": {{"asset": "a"}}, "criteria": {{"type": "last_update_within", "lower_bound_delta": {}}}}}"#,
                delta
            );
            assert!(serde_json::from_str::<FreshnessCheckSpec>(&json).is_err());
        }
    }

    #[test]
    fn test_anomaly_defaults() {
        let json = r#"{"name": "x", "target": {"asset": "a"}, "criteria": {"type": "anomaly"}}"#;
        let spec: FreshnessCheckSpec = serde_json::from_str(json).unwrap();

        assert_eq!(spec.lower_bound_delta(), None);
        assert_eq!(
            spec.criteria,
            FreshnessCriteria::Anomaly { min_history: 5, sensitivity: 3.0 }
        );
    }

    #[test]
    fn test_time_partitioned_target_is_latest_partition() {
        let graph = AssetGraph::builder()
            .add_asset(AssetNode::new("events").with_partitions(PartitionsDefinition::daily(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            )))
            .build()
            .unwrap();
        let spec = FreshnessCheckSpec::last_update_within(
            "events_fresh",
            CheckTarget::Asset("events".into()),
            Duration::days(1),
        );

        let targets = spec.target_partitions(&graph, "2024-01-04T06:00:00Z".parse().unwrap());
        assert_eq!(targets, vec![AssetPartition::new("events", "2024-01-03")]);
    }

    #[test]
    fn test_blocks_downstream_requires_error_severity() {
        let mut result = CheckResult {
            check: "c".into(),
            asset_partition: AssetPartition::unpartitioned("a"),
            status: CheckStatus::Overdue,
            severity: CheckSeverity::Warn,
            blocking: true,
            evaluated_at: chrono::Utc::now(),
            last_updated_at: None,
            description: String::new(),
        };
        assert!(!result.blocks_downstream());

        result.severity = CheckSeverity::Error;
        assert!(result.blocks_downstream());
    }
}
