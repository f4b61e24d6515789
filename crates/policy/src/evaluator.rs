//! Policy evaluation with skip veto, in-flight suppression and rate limiting.

use automat_core::{AssetKey, AssetPartition, Decision, EvaluationResult};
use chrono::Duration;
use tracing::{debug, warn};

use crate::{AutomationPolicy, EvaluationContext, RuleKind, Selection, SelectorStrategy, Vote};

/// Default age after which an unsatisfied request no longer suppresses new ones.
pub const DEFAULT_REQUEST_EXPIRY_SECONDS: i64 = 3600;

/// Evaluation of every partition of one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEvaluation {
    /// Evaluated asset
    pub asset: AssetKey,
    /// One result per partition, in partition order
    pub results: Vec<EvaluationResult>,
    /// Partitions to request, in preference order
    pub selected: Vec<AssetPartition>,
    /// Partitions dropped by the rate limit
    pub discarded: Vec<AssetPartition>,
}

/// Applies automation policies to asset partitions.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    request_expiry: Duration,
}

impl PolicyEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self {
            request_expiry: Duration::seconds(DEFAULT_REQUEST_EXPIRY_SECONDS),
        }
    }

    /// Set how long an unsatisfied request keeps suppressing new ones.
    pub fn with_request_expiry(mut self, expiry: Duration) -> Self {
        self.request_expiry = expiry;
        self
    }

    /// Evaluate one partition. Any skip vote vetoes every materialize vote.
    pub fn evaluate_partition(
        &self,
        ctx: &EvaluationContext<'_>,
        policy: &AutomationPolicy,
        asset_partition: &AssetPartition,
    ) -> EvaluationResult {
        let mut materialize_rules = Vec::new();
        let mut skip_rules = Vec::new();

        for rule in &policy.rules {
            match (rule.kind(), rule.evaluate(ctx, asset_partition)) {
                (RuleKind::Materialize, Vote::Materialize) => materialize_rules.push(rule.id().to_string()),
                (RuleKind::Skip, Vote::Skip) => skip_rules.push(rule.id().to_string()),
                _ => {}
            }
        }

        let mut decision = Decision::from_votes(!materialize_rules.is_empty(), !skip_rules.is_empty());
        let mut in_flight = false;

        if decision == Decision::Materialize {
            if let Some(marker) = ctx
                .snapshot
                .outstanding_request(asset_partition, ctx.now, self.request_expiry)
            {
                debug!(
                    "{} already requested by {} at {}",
                    asset_partition, marker.request_id, marker.requested_at
                );
                decision = Decision::NoOp;
                in_flight = true;
            }
        }

        EvaluationResult {
            asset_partition: asset_partition.clone(),
            materialize_rules,
            skip_rules,
            decision,
            in_flight,
            discarded_by_rate_limit: false,
        }
    }

    /// Evaluate every partition of `asset` and apply the policy's rate limit.
    pub fn evaluate_asset(
        &self,
        ctx: &EvaluationContext<'_>,
        asset: &AssetKey,
        policy: &AutomationPolicy,
    ) -> AssetEvaluation {
        let mut results: Vec<EvaluationResult> = ctx
            .graph
            .asset_partitions(asset, ctx.now)
            .iter()
            .map(|ap| self.evaluate_partition(ctx, policy, ap))
            .collect();

        let candidates = results
            .iter()
            .filter(|r| r.is_requested())
            .map(|r| r.asset_partition.clone())
            .collect();

        let strategy = SelectorStrategy::for_partitions(ctx.graph.partitions_def(asset));
        let Selection { selected, discarded } =
            strategy.select(candidates, policy.max_materializations_per_minute as usize);

        if !discarded.is_empty() {
            warn!(
                "Rate limit of {} reached for {}: discarding {} partition(s)",
                policy.max_materializations_per_minute,
                asset,
                discarded.len()
            );
            for result in results.iter_mut().filter(|r| discarded.contains(&r.asset_partition)) {
                result.decision = Decision::NoOp;
                result.discarded_by_rate_limit = true;
            }
        }

        AssetEvaluation {
            asset: asset.clone(),
            results,
            selected,
            discarded,
        }
    }
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automat_core::{
        AssetGraph, AssetNode, CheckResult, CheckSeverity, CheckStatus, PartitionsDefinition, RequestId,
        RequestMarker, Time,
    };
    use automat_storage::IndexSnapshot;
    use chrono::NaiveDate;

    use crate::AutomationRule;

    fn t(s: &str) -> Time {
        s.parse().unwrap()
    }

    fn now() -> Time {
        t("2024-01-04T12:00:00Z")
    }

    fn ap(key: &str) -> AssetPartition {
        AssetPartition::unpartitioned(key)
    }

    fn pair() -> AssetGraph {
        AssetGraph::builder()
            .add_asset(AssetNode::new("raw"))
            .add_asset(AssetNode::new("clean"))
            .add_dependency("raw", "clean")
            .build()
            .unwrap()
    }

    #[test]
    fn test_skip_vetoes_materialize() {
        let graph = pair();
        // clean missing, raw missing too
        let snapshot = IndexSnapshot::empty(now());
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());

        let result = PolicyEvaluator::new().evaluate_partition(&ctx, &AutomationPolicy::eager(), &ap("clean"));

        assert_eq!(result.decision, Decision::Skip);
        assert_eq!(result.materialize_rules, vec!["materialize_on_missing"]);
        assert_eq!(result.skip_rules, vec!["skip_on_parent_missing"]);
    }

    #[test]
    fn test_no_rules_fired_is_noop() {
        let graph = pair();
        let snapshot = IndexSnapshot::empty(now())
            .with_materialization(ap("raw"), t("2024-01-04T10:00:00Z"))
            .with_materialization(ap("clean"), t("2024-01-04T11:00:00Z"));
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());

        let result = PolicyEvaluator::new().evaluate_partition(&ctx, &AutomationPolicy::eager(), &ap("clean"));

        assert_eq!(result.decision, Decision::NoOp);
        assert!(result.materialize_rules.is_empty());
        assert!(!result.in_flight);
    }

    #[test]
    fn test_outstanding_request_suppresses() {
        let graph = pair();
        let base = IndexSnapshot::empty(now())
            .with_materialization(ap("raw"), t("2024-01-04T11:00:00Z"))
            .with_materialization(ap("clean"), t("2024-01-04T10:00:00Z"));
        let policy = AutomationPolicy::eager();
        let evaluator = PolicyEvaluator::new();

        let pending = base
            .clone()
            .with_request(ap("clean"), RequestMarker::new(RequestId::new(), t("2024-01-04T11:30:00Z")));
        let ctx = EvaluationContext::new(&graph, &pending, &[], now());
        let result = evaluator.evaluate_partition(&ctx, &policy, &ap("clean"));
        assert_eq!(result.decision, Decision::NoOp);
        assert!(result.in_flight);
        assert_eq!(result.materialize_rules, vec!["materialize_on_parent_updated"]);

        // An expired request no longer suppresses
        let expired = base.with_request(ap("clean"), RequestMarker::new(RequestId::new(), t("2024-01-04T10:30:00Z")));
        let ctx = EvaluationContext::new(&graph, &expired, &[], now());
        let result = evaluator
            .clone()
            .with_request_expiry(Duration::minutes(30))
            .evaluate_partition(&ctx, &policy, &ap("clean"));
        assert_eq!(result.decision, Decision::Materialize);
    }

    #[test]
    fn test_rate_limit_discards_oldest() {
        let graph = AssetGraph::builder()
            .add_asset(
                AssetNode::new("events")
                    .with_partitions(PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())),
            )
            .build()
            .unwrap();
        let snapshot = IndexSnapshot::empty(now());
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());
        let policy = AutomationPolicy::new(vec![AutomationRule::MaterializeOnMissing]);

        let evaluation = PolicyEvaluator::new().evaluate_asset(&ctx, &AssetKey::new("events"), &policy);

        // 2024-01-01 through 2024-01-03 are complete at noon on the 4th
        assert_eq!(evaluation.results.len(), 3);
        assert_eq!(evaluation.selected, vec![AssetPartition::new("events", "2024-01-03")]);
        assert_eq!(evaluation.discarded.len(), 2);

        let discarded: Vec<_> = evaluation
            .results
            .iter()
            .filter(|r| r.discarded_by_rate_limit)
            .collect();
        assert_eq!(discarded.len(), 2);
        assert!(discarded.iter().all(|r| r.decision == Decision::NoOp));
    }

    fn daily_pair() -> AssetGraph {
        let daily = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        AssetGraph::builder()
            .add_asset(AssetNode::new("events").with_partitions(daily.clone()))
            .add_asset(AssetNode::new("summary").with_partitions(daily))
            .add_dependency("events", "summary")
            .build()
            .unwrap()
    }

    /// 01-01 up to date, 01-02 behind its parent, 01-03 missing on both sides.
    fn mixed_snapshot() -> IndexSnapshot {
        let day = |asset: &str, key: &str| AssetPartition::new(asset, key);
        IndexSnapshot::empty(now())
            .with_materialization(day("events", "2024-01-01"), t("2024-01-02T01:00:00Z"))
            .with_materialization(day("summary", "2024-01-01"), t("2024-01-02T02:00:00Z"))
            .with_materialization(day("events", "2024-01-02"), t("2024-01-04T09:00:00Z"))
            .with_materialization(day("summary", "2024-01-02"), t("2024-01-03T02:00:00Z"))
    }

    fn requested(evaluation: &AssetEvaluation) -> Vec<AssetPartition> {
        let mut all: Vec<_> = evaluation.selected.iter().chain(&evaluation.discarded).cloned().collect();
        all.sort();
        all
    }

    #[test]
    fn test_adding_materialize_rules_never_shrinks_candidates() {
        let graph = daily_pair();
        let snapshot = mixed_snapshot();
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());
        let evaluator = PolicyEvaluator::new();
        let summary = AssetKey::new("summary");

        let additions = [
            AutomationRule::MaterializeOnParentUpdated,
            AutomationRule::materialize_on_cron("0 6 * * *", "UTC").unwrap(),
            AutomationRule::materialize_on_required_for_freshness(),
        ];
        let mut policy =
            AutomationPolicy::new(vec![AutomationRule::MaterializeOnMissing]).with_max_materializations_per_minute(100);
        let mut previous = requested(&evaluator.evaluate_asset(&ctx, &summary, &policy));
        assert_eq!(previous, vec![AssetPartition::new("summary", "2024-01-03")]);

        for rule in additions {
            policy = policy.with_rule(rule);
            let current = requested(&evaluator.evaluate_asset(&ctx, &summary, &policy));
            assert!(previous.iter().all(|p| current.contains(p)), "{:?} lost candidates", policy.rules);
            previous = current;
        }
        assert!(previous.contains(&AssetPartition::new("summary", "2024-01-02")));
    }

    #[test]
    fn test_adding_skip_rules_never_grows_selection() {
        let graph = daily_pair();
        let snapshot = mixed_snapshot();
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());
        let evaluator = PolicyEvaluator::new();
        let summary = AssetKey::new("summary");

        let additions = [
            AutomationRule::SkipOnParentMissing,
            AutomationRule::SkipOnParentOutdated,
            AutomationRule::skip_on_not_all_parents_updated(),
            AutomationRule::SkipOnBlockingCheckFailed,
        ];

        for limit in [1, 100] {
            let mut policy = AutomationPolicy::new(vec![
                AutomationRule::MaterializeOnMissing,
                AutomationRule::MaterializeOnParentUpdated,
            ])
            .with_max_materializations_per_minute(limit);
            let mut previous = requested(&evaluator.evaluate_asset(&ctx, &summary, &policy));
            let mut selected = evaluator.evaluate_asset(&ctx, &summary, &policy).selected.len();

            for rule in additions.clone() {
                policy = policy.with_rule(rule);
                let evaluation = evaluator.evaluate_asset(&ctx, &summary, &policy);
                let current = requested(&evaluation);
                assert!(current.iter().all(|p| previous.contains(p)), "{:?} added candidates", policy.rules);
                assert!(evaluation.selected.len() <= selected);
                previous = current;
                selected = evaluation.selected.len();
            }
            assert_eq!(previous, vec![AssetPartition::new("summary", "2024-01-02")]);
        }
    }

    #[test]
    fn test_blocking_check_holds_back_child() {
        let graph = pair();
        let snapshot = IndexSnapshot::empty(now())
            .with_materialization(ap("raw"), t("2024-01-04T11:00:00Z"))
            .with_check_result(CheckResult {
                check: "raw_fresh".into(),
                asset_partition: ap("raw"),
                status: CheckStatus::Overdue,
                severity: CheckSeverity::Error,
                blocking: true,
                evaluated_at: now(),
                last_updated_at: Some(t("2024-01-04T11:00:00Z")),
                description: String::new(),
            });
        let ctx = EvaluationContext::new(&graph, &snapshot, &[], now());
        let policy = AutomationPolicy::eager().with_rule(AutomationRule::SkipOnBlockingCheckFailed);

        let result = PolicyEvaluator::new().evaluate_partition(&ctx, &policy, &ap("clean"));

        assert_eq!(result.decision, Decision::Skip);
        assert_eq!(result.skip_rules, vec!["skip_on_blocking_check_failed"]);
    }
}
