//! Definition-time errors.

use crate::AssetKey;

/// Errors raised while loading definitions. All of them are fatal: the
/// definitions are rejected as a whole.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    /// Dependency graph contains a cycle
    #[error("cyclic dependency between assets: {}", format_keys(.0))]
    CyclicDependency(Vec<AssetKey>),

    /// Asset defined twice
    #[error("asset '{0}' is defined more than once")]
    DuplicateAsset(AssetKey),

    /// Reference to an asset that was never defined
    #[error("unknown asset '{0}'")]
    UnknownAsset(AssetKey),

    /// Two sensor bindings target the same asset
    #[error("asset '{asset}' is targeted by both '{first}' and '{second}'")]
    DuplicateBinding {
        /// Asset targeted twice
        asset: AssetKey,
        /// First binding
        first: String,
        /// Second binding
        second: String,
    },

    /// Two sensor bindings share a name
    #[error("sensor binding '{0}' is defined more than once")]
    DuplicateBindingName(String),

    /// Two checks with the same name on one asset
    #[error("duplicate check '{name}' on asset '{asset}'")]
    DuplicateCheck {
        /// Asset
        asset: AssetKey,
        /// Check name
        name: String,
    },

    /// Cron expression could not be parsed
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// Expression as given
        expression: String,
        /// Parser message
        reason: String,
    },

    /// Timezone not found in the tz database
    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// Partitions definition cannot produce valid keys
    #[error("invalid partitions for '{asset}': {reason}")]
    InvalidPartitions {
        /// Asset
        asset: String,
        /// Why
        reason: String,
    },

    /// Scheduler or binding setting out of range
    #[error("invalid setting '{field}': {reason}")]
    InvalidConfig {
        /// Setting name
        field: String,
        /// Why
        reason: String,
    },

    /// Policy option out of range
    #[error("invalid policy for '{asset}': {reason}")]
    InvalidPolicy {
        /// Asset
        asset: AssetKey,
        /// Why
        reason: String,
    },
}

fn format_keys(keys: &[AssetKey]) -> String {
    keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(" -> ")
}
