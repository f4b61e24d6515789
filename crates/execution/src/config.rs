//! Scheduler configuration.

use std::time::Duration;

use automat_core::{DefinitionError, DEFAULT_MINIMUM_INTERVAL_SECONDS};
use serde::{Deserialize, Serialize};

/// Harness and engine settings. Every field has a default, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Default spacing between ticks of one binding
    pub minimum_interval_seconds: u64,

    /// Upper bound on a single dispatch call
    pub dispatch_timeout_ms: u64,

    /// Age after which an unsatisfied request stops suppressing new ones
    pub request_expiry_seconds: u64,

    /// Cadence of the freshness runner
    pub freshness_interval_seconds: u64,

    /// Store per-partition evaluation results in tick records
    pub persist_evaluations: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimum_interval_seconds: DEFAULT_MINIMUM_INTERVAL_SECONDS,
            dispatch_timeout_ms: 5000,
            request_expiry_seconds: 3600,
            freshness_interval_seconds: 60,
            persist_evaluations: true,
        }
    }
}

impl SchedulerConfig {
    /// Dispatch timeout as a duration.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Request expiry as a duration. Saturates at the largest representable
    /// duration; [`validate`](Self::validate) rejects such values.
    pub fn request_expiry(&self) -> chrono::Duration {
        i64::try_from(self.request_expiry_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Freshness cadence as a duration.
    pub fn freshness_interval(&self) -> Duration {
        Duration::from_secs(self.freshness_interval_seconds)
    }

    /// Reject settings the harness cannot run with.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let positive = [
            ("minimum_interval_seconds", self.minimum_interval_seconds),
            ("dispatch_timeout_ms", self.dispatch_timeout_ms),
            ("freshness_interval_seconds", self.freshness_interval_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DefinitionError::InvalidConfig {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if i64::try_from(self.request_expiry_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .is_none()
        {
            return Err(DefinitionError::InvalidConfig {
                field: "request_expiry_seconds".to_string(),
                reason: format!("{}s is out of range", self.request_expiry_seconds),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SchedulerConfig::default());
        assert_eq!(config.minimum_interval_seconds, 30);
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_override() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"dispatch_timeout_ms": 250, "persist_evaluations": false}"#).unwrap();
        assert_eq!(config.dispatch_timeout(), Duration::from_millis(250));
        assert!(!config.persist_evaluations);
        assert_eq!(config.request_expiry(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_validate_rejects_zero_and_out_of_range() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let zero_freshness = SchedulerConfig {
            freshness_interval_seconds: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            zero_freshness.validate(),
            Err(DefinitionError::InvalidConfig { field, .. }) if field == "freshness_interval_seconds"
        ));

        let huge_expiry = SchedulerConfig {
            request_expiry_seconds: u64::MAX,
            ..SchedulerConfig::default()
        };
        assert!(huge_expiry.validate().is_err());
        assert_eq!(huge_expiry.request_expiry(), chrono::Duration::MAX);
    }
}
