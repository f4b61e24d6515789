//! Built-in automation rules.
//!
//! Rules are a closed set of stateless predicates. Each one reads the
//! evaluation context and votes on a single asset partition; combining the
//! votes is the evaluator's job.

use automat_core::{AssetPartition, DefinitionError};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::{CronTrigger, EvaluationContext};

/// A single rule's opinion on one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The partition should be materialized
    Materialize,
    /// The partition must not be materialized this tick
    Skip,
    /// Rule does not apply
    NoOpinion,
}

/// Which vote a rule can cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Casts `Materialize` or abstains
    Materialize,
    /// Casts `Skip` or abstains
    Skip,
}

fn default_lookahead_seconds() -> u64 {
    300
}

/// Lookahead as a chrono duration, `None` when it does not fit.
pub(crate) fn lookahead(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds).ok().and_then(Duration::try_seconds)
}

/// Built-in rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AutomationRule {
    /// No update record exists for the partition
    MaterializeOnMissing,
    /// A mapped parent partition updated after this partition's last materialization
    MaterializeOnParentUpdated,
    /// A cron tick passed since the last materialization or request
    MaterializeOnCron(CronTrigger),
    /// A freshness check at or below this asset is (about to be) overdue
    MaterializeOnRequiredForFreshness {
        /// How far ahead of a check's deadline to start materializing
        #[serde(default = "default_lookahead_seconds")]
        lookahead_seconds: u64,
    },
    /// A mapped parent partition has never been updated
    SkipOnParentMissing,
    /// A mapped parent partition is itself behind its ancestors
    SkipOnParentOutdated,
    /// Some, but not all, parents updated since the last materialization
    SkipOnNotAllParentsUpdated {
        /// Compare every mapped parent partition instead of parent assets
        #[serde(default)]
        require_update_for_all_parent_partitions: bool,
    },
    /// A blocking error-severity check on a mapped parent partition is overdue
    SkipOnBlockingCheckFailed,
}

impl AutomationRule {
    /// Cron rule from an expression and IANA timezone.
    pub fn materialize_on_cron(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, DefinitionError> {
        CronTrigger::new(expression, timezone).map(Self::MaterializeOnCron)
    }

    /// Lookahead rule with the default five-minute lead.
    pub fn materialize_on_required_for_freshness() -> Self {
        Self::MaterializeOnRequiredForFreshness {
            lookahead_seconds: default_lookahead_seconds(),
        }
    }

    /// Partial-update rule comparing parent assets.
    pub fn skip_on_not_all_parents_updated() -> Self {
        Self::SkipOnNotAllParentsUpdated {
            require_update_for_all_parent_partitions: false,
        }
    }

    /// Stable identifier, shown in evaluation results.
    pub fn id(&self) -> &'static str {
        match self {
            Self::MaterializeOnMissing => "materialize_on_missing",
            Self::MaterializeOnParentUpdated => "materialize_on_parent_updated",
            Self::MaterializeOnCron(_) => "materialize_on_cron",
            Self::MaterializeOnRequiredForFreshness { .. } => "materialize_on_required_for_freshness",
            Self::SkipOnParentMissing => "skip_on_parent_missing",
            Self::SkipOnParentOutdated => "skip_on_parent_outdated",
            Self::SkipOnNotAllParentsUpdated { .. } => "skip_on_not_all_parents_updated",
            Self::SkipOnBlockingCheckFailed => "skip_on_blocking_check_failed",
        }
    }

    /// Which vote this rule casts.
    pub fn kind(&self) -> RuleKind {
        match self {
            Self::MaterializeOnMissing
            | Self::MaterializeOnParentUpdated
            | Self::MaterializeOnCron(_)
            | Self::MaterializeOnRequiredForFreshness { .. } => RuleKind::Materialize,
            Self::SkipOnParentMissing
            | Self::SkipOnParentOutdated
            | Self::SkipOnNotAllParentsUpdated { .. }
            | Self::SkipOnBlockingCheckFailed => RuleKind::Skip,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::MaterializeOnMissing => "materialization is missing".to_string(),
            Self::MaterializeOnParentUpdated => "upstream data has changed since latest materialization".to_string(),
            Self::MaterializeOnCron(trigger) => format!(
                "not materialized since last cron schedule tick of '{}' (timezone: {})",
                trigger.expression(),
                trigger.timezone()
            ),
            Self::MaterializeOnRequiredForFreshness { .. } => {
                "required to meet this or downstream asset's freshness check".to_string()
            }
            Self::SkipOnParentMissing => "waiting on upstream data to be present".to_string(),
            Self::SkipOnParentOutdated => "waiting to materialize until upstream data is up to date".to_string(),
            Self::SkipOnNotAllParentsUpdated { .. } => "waiting on upstream data to be updated".to_string(),
            Self::SkipOnBlockingCheckFailed => "a blocking upstream check is failing".to_string(),
        }
    }

    /// Vote on one partition.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>, ap: &AssetPartition) -> Vote {
        let fired = match self {
            Self::MaterializeOnMissing => !ctx.snapshot.has_record(ap),
            Self::MaterializeOnParentUpdated => parent_updated(ctx, ap),
            Self::MaterializeOnCron(trigger) => {
                let materialized = ctx.snapshot.last_materialized_at(ap);
                let requested = ctx.snapshot.request_marker(ap).map(|m| m.requested_at);
                let baseline = materialized.max(requested);
                trigger.tick_crossed(baseline, ctx.now)
            }
            Self::MaterializeOnRequiredForFreshness { lookahead_seconds } => {
                lookahead(*lookahead_seconds).is_some_and(|lead| required_for_freshness(ctx, ap, lead))
            }
            Self::SkipOnParentMissing => ctx
                .upstream_of(ap)
                .iter()
                .any(|parent| !ctx.snapshot.has_record(parent)),
            Self::SkipOnParentOutdated => ctx
                .upstream_of(ap)
                .iter()
                .any(|parent| ctx.is_outdated(parent)),
            Self::SkipOnNotAllParentsUpdated {
                require_update_for_all_parent_partitions,
            } => partially_updated(ctx, ap, *require_update_for_all_parent_partitions),
            Self::SkipOnBlockingCheckFailed => ctx.upstream_of(ap).iter().any(|parent| {
                let updated = ctx.snapshot.last_updated_at(parent);
                ctx.snapshot
                    .check_results(parent)
                    .iter()
                    .any(|r| r.blocks_downstream() && r.is_current(updated))
            }),
        };

        match (fired, self.kind()) {
            (false, _) => Vote::NoOpinion,
            (true, RuleKind::Materialize) => Vote::Materialize,
            (true, RuleKind::Skip) => Vote::Skip,
        }
    }
}

fn parent_updated(ctx: &EvaluationContext<'_>, ap: &AssetPartition) -> bool {
    let since = ctx.snapshot.last_materialized_at(ap);
    ctx.upstream_of(ap)
        .iter()
        .any(|parent| ctx.snapshot.updated_since(parent, since))
}

fn partially_updated(ctx: &EvaluationContext<'_>, ap: &AssetPartition, per_partition: bool) -> bool {
    // Never materialized: there is no baseline to compare against.
    let Some(since) = ctx.snapshot.last_materialized_at(ap) else {
        return false;
    };
    let updated = |p: &AssetPartition| ctx.snapshot.updated_since(p, Some(since));

    let flags: Vec<bool> = if per_partition {
        ctx.upstream_of(ap).iter().map(updated).collect()
    } else {
        ctx.graph
            .upstream_partitions(ap, ctx.now)
            .iter()
            .filter(|(_, mapped)| !mapped.is_empty())
            .map(|(_, mapped)| mapped.iter().any(updated))
            .collect()
    };

    let count = flags.iter().filter(|f| **f).count();
    count > 0 && count < flags.len()
}

fn required_for_freshness(ctx: &EvaluationContext<'_>, ap: &AssetPartition, lookahead: Duration) -> bool {
    let own = ctx.snapshot.last_updated_at(ap);

    ctx.checks_at_or_below(&ap.asset).into_iter().any(|check| {
        let Some(delta) = check.lower_bound_delta() else {
            return false;
        };
        check
            .target_partitions(ctx.graph, ctx.now)
            .iter()
            .filter(|target| ctx.feeds_into(ap, target))
            .any(|target| {
                let target_updated = ctx.snapshot.last_updated_at(target);
                // An unrepresentable horizon covers every deadline; an
                // unrepresentable deadline is never reached.
                let due = match (target_updated, ctx.now.checked_add_signed(lookahead)) {
                    (None, _) | (Some(_), None) => true,
                    (Some(t), Some(horizon)) => t.checked_add_signed(delta).is_some_and(|d| d <= horizon),
                };
                // Only help if this partition is not already newer than the
                // data the target was last built from.
                let behind = match (own, target_updated) {
                    (None, _) => true,
                    (Some(_), None) => false,
                    (Some(own), Some(target)) => own <= target,
                };
                due && behind
            })
    })
}
