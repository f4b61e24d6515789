//! Automation policies: an ordered rule set plus a per-tick rate limit.

use automat_core::{AssetKey, DefinitionError};
use serde::{Deserialize, Serialize};

use crate::rule::lookahead;
use crate::{AutomationRule, RuleKind};

fn default_max_materializations_per_minute() -> u32 {
    1
}

/// Rules attached to one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationPolicy {
    /// Rules in evaluation order
    pub rules: Vec<AutomationRule>,

    /// Maximum partitions of this asset requested per tick
    #[serde(default = "default_max_materializations_per_minute")]
    pub max_materializations_per_minute: u32,
}

impl AutomationPolicy {
    /// Policy from an explicit rule list.
    pub fn new(rules: Vec<AutomationRule>) -> Self {
        Self {
            rules,
            max_materializations_per_minute: default_max_materializations_per_minute(),
        }
    }

    /// Keep the asset up to date with its parents as soon as possible.
    pub fn eager() -> Self {
        Self::new(vec![
            AutomationRule::MaterializeOnMissing,
            AutomationRule::MaterializeOnParentUpdated,
            AutomationRule::materialize_on_required_for_freshness(),
            AutomationRule::SkipOnParentOutdated,
            AutomationRule::SkipOnParentMissing,
        ])
    }

    /// Materialize only when a freshness check needs it.
    pub fn lazy() -> Self {
        Self::new(vec![
            AutomationRule::materialize_on_required_for_freshness(),
            AutomationRule::SkipOnParentOutdated,
            AutomationRule::SkipOnParentMissing,
        ])
    }

    /// Materialize once per cron tick, after parents have caught up.
    pub fn on_cron(expression: impl Into<String>, timezone: impl Into<String>) -> Result<Self, DefinitionError> {
        Ok(Self::new(vec![
            AutomationRule::materialize_on_cron(expression, timezone)?,
            AutomationRule::SkipOnParentOutdated,
            AutomationRule::skip_on_not_all_parents_updated(),
        ]))
    }

    /// Append a rule.
    pub fn with_rule(mut self, rule: AutomationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Drop every rule with the given id.
    pub fn without_rule(mut self, id: &str) -> Self {
        self.rules.retain(|r| r.id() != id);
        self
    }

    /// Set the per-tick rate limit.
    pub fn with_max_materializations_per_minute(mut self, limit: u32) -> Self {
        self.max_materializations_per_minute = limit;
        self
    }

    /// Rules that can cast a materialize vote.
    pub fn materialize_rules(&self) -> impl Iterator<Item = &AutomationRule> {
        self.rules.iter().filter(|r| r.kind() == RuleKind::Materialize)
    }

    /// Rules that can veto.
    pub fn skip_rules(&self) -> impl Iterator<Item = &AutomationRule> {
        self.rules.iter().filter(|r| r.kind() == RuleKind::Skip)
    }

    /// Reject policies that could never request anything sensible.
    pub fn validate(&self, asset: &AssetKey) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidPolicy {
            asset: asset.clone(),
            reason,
        };
        if self.max_materializations_per_minute == 0 {
            return Err(invalid("max_materializations_per_minute must be at least 1".to_string()));
        }
        for rule in &self.rules {
            if let AutomationRule::MaterializeOnRequiredForFreshness { lookahead_seconds } = rule {
                if lookahead(*lookahead_seconds).is_none() {
                    return Err(invalid(format!("lookahead of {}s is out of range", lookahead_seconds)));
                }
            }
        }
        Ok(())
    }
}

impl Default for AutomationPolicy {
    fn default() -> Self {
        Self::eager()
    }
}
