//! Partitions definitions.
//!
//! Time-based definitions produce one partition per completed window up to the
//! evaluation time. Keys are formatted so that chronological order and
//! lexicographic order agree.

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{DefinitionError, PartitionKey, Time};

/// Key format for daily partitions.
pub const DAILY_FORMAT: &str = "%Y-%m-%d";

/// Key format for hourly partitions.
pub const HOURLY_FORMAT: &str = "%Y-%m-%d-%H:%M";

/// How an asset is subdivided into partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    /// A fixed set of keys
    Static {
        /// Partition keys
        keys: Vec<String>,
    },
    /// One partition per UTC day, starting at `start_date`
    Daily {
        /// First partition
        start_date: NaiveDate,
        /// Extra windows past the last completed day (may be negative)
        #[serde(default)]
        end_offset: i64,
    },
    /// One partition per UTC hour, starting at `start`
    Hourly {
        /// First partition (truncated to the hour)
        start: Time,
        /// Extra windows past the last completed hour (may be negative)
        #[serde(default)]
        end_offset: i64,
    },
}

impl PartitionsDefinition {
    /// Static partitions from a list of keys.
    pub fn static_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Daily partitions starting at the given date.
    pub fn daily(start_date: NaiveDate) -> Self {
        Self::Daily {
            start_date,
            end_offset: 0,
        }
    }

    /// Hourly partitions starting at the given time.
    pub fn hourly(start: Time) -> Self {
        Self::Hourly {
            start,
            end_offset: 0,
        }
    }

    /// Whether partitions are ordered by time.
    pub fn is_time_based(&self) -> bool {
        !matches!(self, Self::Static { .. })
    }

    /// All partition keys that exist at `now`, in chronological order for
    /// time-based definitions and declaration order otherwise.
    pub fn partition_keys(&self, now: Time) -> Vec<PartitionKey> {
        match self {
            Self::Static { keys } => keys.iter().cloned().map(PartitionKey::from).collect(),
            Self::Daily { start_date, end_offset } => {
                let Some(last) = last_daily(now, *end_offset) else {
                    return Vec::new();
                };
                start_date
                    .iter_days()
                    .take_while(|d| *d <= last)
                    .map(|d| PartitionKey::new(d.format(DAILY_FORMAT).to_string()))
                    .collect()
            }
            Self::Hourly { start, end_offset } => {
                let Some(last) = last_hourly(now, *end_offset) else {
                    return Vec::new();
                };
                let mut cursor = truncate_hour(*start);
                let mut keys = Vec::new();
                while cursor <= last {
                    keys.push(PartitionKey::new(cursor.format(HOURLY_FORMAT).to_string()));
                    match cursor.checked_add_signed(Duration::hours(1)) {
                        Some(next) => cursor = next,
                        None => break,
                    }
                }
                keys
            }
        }
    }

    /// Whether `key` names a partition that exists at `now`.
    pub fn contains(&self, key: &PartitionKey, now: Time) -> bool {
        match self {
            Self::Static { keys } => keys.iter().any(|k| k == key.as_str()),
            Self::Daily { start_date, end_offset } => {
                let Ok(date) = NaiveDate::parse_from_str(key.as_str(), DAILY_FORMAT) else {
                    return false;
                };
                match last_daily(now, *end_offset) {
                    Some(last) => date >= *start_date && date <= last,
                    None => false,
                }
            }
            Self::Hourly { start, end_offset } => {
                let Ok(naive) = NaiveDateTime::parse_from_str(key.as_str(), HOURLY_FORMAT) else {
                    return false;
                };
                let at = Utc.from_utc_datetime(&naive);
                at.minute() == 0
                    && at >= truncate_hour(*start)
                    && last_hourly(now, *end_offset).is_some_and(|last| at <= last)
            }
        }
    }

    /// The most recent partition at `now`, if any exist.
    pub fn last_partition(&self, now: Time) -> Option<PartitionKey> {
        match self {
            Self::Static { keys } => keys.last().cloned().map(PartitionKey::from),
            _ => self.partition_keys(now).pop(),
        }
    }

    /// Reject definitions that can never produce well-formed keys.
    pub(crate) fn validate(&self, asset: &str) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidPartitions {
            asset: asset.to_string(),
            reason,
        };
        match self {
            Self::Static { keys } => {
                let mut seen = HashSet::new();
                for key in keys {
                    if !seen.insert(key.as_str()) {
                        return Err(invalid(format!("duplicate partition key '{}'", key)));
                    }
                }
            }
            Self::Daily { end_offset, .. } => {
                if Duration::try_days(*end_offset).is_none() {
                    return Err(invalid(format!("end_offset of {} days is out of range", end_offset)));
                }
            }
            Self::Hourly { end_offset, .. } => {
                if Duration::try_hours(*end_offset).is_none() {
                    return Err(invalid(format!("end_offset of {} hours is out of range", end_offset)));
                }
            }
        }
        Ok(())
    }
}

fn last_daily(now: Time, end_offset: i64) -> Option<NaiveDate> {
    now.date_naive()
        .checked_sub_signed(Duration::days(1))?
        .checked_add_signed(Duration::try_days(end_offset)?)
}

fn last_hourly(now: Time, end_offset: i64) -> Option<Time> {
    truncate_hour(now)
        .checked_sub_signed(Duration::hours(1))?
        .checked_add_signed(Duration::try_hours(end_offset)?)
}

fn truncate_hour(t: Time) -> Time {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> Time {
        s.parse().unwrap()
    }

    #[test]
    fn test_daily_keys_stop_at_last_complete_day() {
        let def = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let keys = def.partition_keys(at("2024-01-04T06:00:00Z"));

        let keys: Vec<_> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
    }

    #[test]
    fn test_daily_contains() {
        let def = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let now = at("2024-01-04T06:00:00Z");

        assert!(def.contains(&"2024-01-03".into(), now));
        assert!(!def.contains(&"2024-01-04".into(), now));
        assert!(!def.contains(&"2023-12-31".into(), now));
        assert!(!def.contains(&"garbage".into(), now));
    }

    #[test]
    fn test_hourly_keys() {
        let def = PartitionsDefinition::hourly(at("2024-01-01T00:30:00Z"));
        let keys = def.partition_keys(at("2024-01-01T03:10:00Z"));

        let keys: Vec<_> = keys.iter().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["2024-01-01-00:00", "2024-01-01-01:00", "2024-01-01-02:00"]);
        assert!(def.contains(&"2024-01-01-02:00".into(), at("2024-01-01T03:10:00Z")));
    }

    #[test]
    fn test_last_partition() {
        let def = PartitionsDefinition::static_keys(["us", "eu"]);
        assert_eq!(def.last_partition(Utc::now()), Some("eu".into()));
        assert!(!def.is_time_based());
    }

    #[test]
    fn test_duplicate_static_keys_rejected() {
        let def = PartitionsDefinition::static_keys(["us", "us"]);
        assert!(def.validate("regions").is_err());
    }

    #[test]
    fn test_out_of_range_end_offset_rejected() {
        let daily = PartitionsDefinition::Daily {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_offset: i64::MAX,
        };
        assert!(matches!(
            daily.validate("events"),
            Err(DefinitionError::InvalidPartitions { .. })
        ));
        assert!(daily.partition_keys(at("2024-01-04T06:00:00Z")).is_empty());

        let hourly = PartitionsDefinition::Hourly {
            start: at("2024-01-01T00:00:00Z"),
            end_offset: i64::MIN,
        };
        assert!(hourly.validate("events").is_err());
        assert!(!hourly.contains(&"2024-01-01-00:00".into(), at("2024-01-01T03:10:00Z")));
    }
}
