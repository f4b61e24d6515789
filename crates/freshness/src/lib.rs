//! Freshness checks for automat.
//!
//! Checks run on their own cadence, independent of materialization ticks,
//! and read the same update index as the scheduler. Results are written back
//! to the index so blocking checks can hold back downstream assets.

#![warn(missing_docs)]

pub mod evaluator;
pub mod runner;

pub use evaluator::{decide, FreshnessDecision, FreshnessEvaluator, FreshnessSummary};
pub use runner::FreshnessRunner;
