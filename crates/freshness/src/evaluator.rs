//! Freshness check evaluation.

use automat_core::{
    AssetGraph, AssetPartition, CheckResult, CheckSeverity, CheckStatus, FreshnessCheckSpec, FreshnessCriteria, Time,
};
use automat_storage::IndexSnapshot;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Overall outcome of a batch of check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessDecision {
    /// Every check is fresh
    Pass,
    /// Warn-severity overdue checks or indeterminate results
    PassWithWarnings,
    /// At least one error-severity check is overdue
    Fail,
}

/// Results of one evaluation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessSummary {
    /// Evaluation time
    pub evaluated_at: Time,

    /// Individual results
    pub results: Vec<CheckResult>,

    /// Final decision
    pub decision: FreshnessDecision,
}

impl FreshnessSummary {
    /// Summarize a set of results.
    pub fn new(evaluated_at: Time, results: Vec<CheckResult>) -> Self {
        let decision = decide(&results);
        Self {
            evaluated_at,
            results,
            decision,
        }
    }

    /// Results with the given status.
    pub fn with_status(&self, status: CheckStatus) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    /// Whether the round passed (possibly with warnings).
    pub fn passed(&self) -> bool {
        self.decision != FreshnessDecision::Fail
    }
}

/// Reduce results to one decision.
pub fn decide(results: &[CheckResult]) -> FreshnessDecision {
    let mut decision = FreshnessDecision::Pass;
    for result in results {
        match (result.status, result.severity) {
            (CheckStatus::Overdue, CheckSeverity::Error) => return FreshnessDecision::Fail,
            (CheckStatus::Overdue, CheckSeverity::Warn) | (CheckStatus::Indeterminate, _) => {
                decision = FreshnessDecision::PassWithWarnings;
            }
            (CheckStatus::Fresh, _) => {}
        }
    }
    decision
}

/// Evaluates freshness checks against an index snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreshnessEvaluator;

impl FreshnessEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one check against every partition it targets.
    pub fn evaluate(
        &self,
        check: &FreshnessCheckSpec,
        graph: &AssetGraph,
        snapshot: &IndexSnapshot,
        now: Time,
    ) -> Vec<CheckResult> {
        let targets = check.target_partitions(graph, now);
        if targets.is_empty() {
            tracing::debug!("Check {} on {} has no partitions yet", check.name, check.asset());
        }

        targets
            .into_iter()
            .map(|ap| self.evaluate_partition(check, ap, snapshot, now))
            .collect()
    }

    /// Evaluate every check.
    pub fn evaluate_all(
        &self,
        checks: &[FreshnessCheckSpec],
        graph: &AssetGraph,
        snapshot: &IndexSnapshot,
        now: Time,
    ) -> FreshnessSummary {
        let results = checks
            .iter()
            .flat_map(|check| self.evaluate(check, graph, snapshot, now))
            .collect();
        FreshnessSummary::new(now, results)
    }

    fn evaluate_partition(
        &self,
        check: &FreshnessCheckSpec,
        asset_partition: AssetPartition,
        snapshot: &IndexSnapshot,
        now: Time,
    ) -> CheckResult {
        let last_updated_at = snapshot.last_updated_at(&asset_partition);

        let (status, description) = match &check.criteria {
            FreshnessCriteria::LastUpdateWithin { lower_bound_delta } => {
                deadline_status(last_updated_at, *lower_bound_delta, now)
            }
            FreshnessCriteria::Anomaly {
                min_history,
                sensitivity,
            } => anomaly_status(
                snapshot.update_history(&asset_partition),
                last_updated_at,
                *min_history,
                *sensitivity,
                now,
            ),
        };

        CheckResult {
            check: check.name.clone(),
            asset_partition,
            status,
            severity: check.severity,
            blocking: check.blocking,
            evaluated_at: now,
            last_updated_at,
            description,
        }
    }
}

fn deadline_status(last_updated_at: Option<Time>, delta: Duration, now: Time) -> (CheckStatus, String) {
    match last_updated_at {
        None => (CheckStatus::Overdue, "no update recorded".to_string()),
        Some(last) if now - last > delta => (
            CheckStatus::Overdue,
            format!(
                "last updated {}s ago, allowed {}s",
                (now - last).num_seconds(),
                delta.num_seconds()
            ),
        ),
        Some(last) => (
            CheckStatus::Fresh,
            format!("last updated {}s ago", (now - last).num_seconds()),
        ),
    }
}

fn anomaly_status(
    history: &[Time],
    last_updated_at: Option<Time>,
    min_history: usize,
    sensitivity: f64,
    now: Time,
) -> (CheckStatus, String) {
    // Two updates are the minimum to get one interval.
    if history.len() < min_history.max(2) {
        return (
            CheckStatus::Indeterminate,
            format!("{} update(s) recorded, {} needed", history.len(), min_history.max(2)),
        );
    }
    let Some(last) = last_updated_at.or_else(|| history.last().copied()) else {
        return (CheckStatus::Indeterminate, "no update recorded".to_string());
    };

    let intervals: Vec<f64> = history
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
        .collect();
    let (mean, stddev) = mean_and_stddev(&intervals);
    let threshold = mean + sensitivity * stddev;
    let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;

    if elapsed > threshold {
        (
            CheckStatus::Overdue,
            format!("last updated {:.0}s ago, expected within {:.0}s", elapsed, threshold),
        )
    } else {
        (
            CheckStatus::Fresh,
            format!("last updated {:.0}s ago, threshold {:.0}s", elapsed, threshold),
        )
    }
}

/// Population mean and standard deviation.
fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use automat_core::{AssetNode, CheckTarget, PartitionsDefinition};
    use chrono::NaiveDate;

    fn t(s: &str) -> Time {
        s.parse().unwrap()
    }

    fn now() -> Time {
        t("2024-01-04T12:00:00Z")
    }

    fn single() -> AssetGraph {
        AssetGraph::builder().add_asset(AssetNode::new("orders")).build().unwrap()
    }

    fn deadline() -> FreshnessCheckSpec {
        FreshnessCheckSpec::last_update_within("orders_fresh", CheckTarget::Asset("orders".into()), Duration::hours(2))
    }

    fn status_at(last: Time) -> CheckStatus {
        let snapshot =
            IndexSnapshot::empty(now()).with_materialization(AssetPartition::unpartitioned("orders"), last);
        FreshnessEvaluator::new().evaluate(&deadline(), &single(), &snapshot, now())[0].status
    }

    #[test]
    fn test_deadline_boundary() {
        let just_over = now() - Duration::hours(2) - Duration::seconds(1);
        let just_under = now() - Duration::hours(2) + Duration::seconds(1);

        assert_eq!(status_at(just_over), CheckStatus::Overdue);
        assert_eq!(status_at(just_under), CheckStatus::Fresh);
        assert_eq!(status_at(now() - Duration::hours(2)), CheckStatus::Fresh);
    }

    #[test]
    fn test_no_record_is_overdue() {
        let results = FreshnessEvaluator::new().evaluate(&deadline(), &single(), &IndexSnapshot::empty(now()), now());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, CheckStatus::Overdue);
        assert_eq!(results[0].last_updated_at, None);
    }

    #[test]
    fn test_anomaly_needs_history() {
        let check = FreshnessCheckSpec::anomaly("orders_regular", CheckTarget::Asset("orders".into()), 3, 2.0);
        let ap = AssetPartition::unpartitioned("orders");
        let snapshot = IndexSnapshot::empty(now())
            .with_materialization(ap.clone(), t("2024-01-04T11:00:00Z"))
            .with_history(ap, vec![t("2024-01-04T10:00:00Z"), t("2024-01-04T11:00:00Z")]);

        let results = FreshnessEvaluator::new().evaluate(&check, &single(), &snapshot, now());

        assert_eq!(results[0].status, CheckStatus::Indeterminate);
        assert!(results[0].status.passed());
    }

    #[test]
    fn test_anomaly_detects_gap() {
        let check = FreshnessCheckSpec::anomaly("orders_regular", CheckTarget::Asset("orders".into()), 3, 2.0);
        let ap = AssetPartition::unpartitioned("orders");
        // hourly updates, then silence
        let history = vec![
            t("2024-01-04T06:00:00Z"),
            t("2024-01-04T07:00:00Z"),
            t("2024-01-04T08:00:00Z"),
            t("2024-01-04T09:00:00Z"),
        ];
        let snapshot = IndexSnapshot::empty(now())
            .with_materialization(ap.clone(), t("2024-01-04T09:00:00Z"))
            .with_history(ap.clone(), history);

        let evaluator = FreshnessEvaluator::new();
        assert_eq!(evaluator.evaluate(&check, &single(), &snapshot, now())[0].status, CheckStatus::Overdue);

        let soon = t("2024-01-04T09:30:00Z");
        assert_eq!(evaluator.evaluate(&check, &single(), &snapshot, soon)[0].status, CheckStatus::Fresh);
    }

    #[test]
    fn test_time_partitioned_asset_checks_latest_partition() {
        let graph = AssetGraph::builder()
            .add_asset(
                AssetNode::new("events")
                    .with_partitions(PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
            )
            .build()
            .unwrap();
        let check =
            FreshnessCheckSpec::last_update_within("events_fresh", CheckTarget::Asset("events".into()), Duration::days(1));

        let results = FreshnessEvaluator::new().evaluate(&check, &graph, &IndexSnapshot::empty(now()), now());

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].asset_partition, AssetPartition::new("events", "2024-01-03"));
    }

    #[test]
    fn test_summary_decision() {
        let evaluator = FreshnessEvaluator::new();
        let snapshot = IndexSnapshot::empty(now());

        let warn = evaluator.evaluate_all(&[deadline()], &single(), &snapshot, now());
        assert_eq!(warn.decision, FreshnessDecision::PassWithWarnings);
        assert!(warn.passed());

        let error = evaluator.evaluate_all(
            &[deadline().with_severity(CheckSeverity::Error)],
            &single(),
            &snapshot,
            now(),
        );
        assert_eq!(error.decision, FreshnessDecision::Fail);
        assert_eq!(error.with_status(CheckStatus::Overdue).count(), 1);

        let fresh_snapshot = IndexSnapshot::empty(now())
            .with_materialization(AssetPartition::unpartitioned("orders"), now() - Duration::minutes(5));
        let pass = evaluator.evaluate_all(&[deadline()], &single(), &fresh_snapshot, now());
        assert_eq!(pass.decision, FreshnessDecision::Pass);
    }
}
