//! Automation policies for automat.
//!
//! A policy is an ordered list of built-in rules plus a per-tick rate limit.
//! The [`PolicyEvaluator`] runs every rule against each partition of an
//! asset, lets any skip vote veto materialization, suppresses partitions with
//! an outstanding request and finally trims the candidates to the rate limit.

#![warn(missing_docs)]

mod trigger;
mod context;
mod rule;
mod policy;
mod selector;
mod evaluator;

pub use trigger::{CronSpec, CronTrigger};
pub use context::EvaluationContext;
pub use rule::{AutomationRule, RuleKind, Vote};
pub use policy::AutomationPolicy;
pub use selector::{
    LexicographicSelector, MostRecentSelector, PartitionSelector, Selection, SelectorStrategy,
};
pub use evaluator::{AssetEvaluation, PolicyEvaluator, DEFAULT_REQUEST_EXPIRY_SECONDS};
