//! Timezone-aware cron triggers.

use std::str::FromStr;

use automat_core::{DefinitionError, Time};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Serialized form of a cron trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    /// Cron expression, 5 fields (minute precision) or 6/7 fields (with seconds)
    pub cron_schedule: String,

    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Parsed cron schedule bound to a timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CronSpec", into = "CronSpec")]
pub struct CronTrigger {
    spec: CronSpec,
    schedule: Schedule,
    tz: Tz,
}

impl CronTrigger {
    /// Parse an expression and timezone.
    pub fn new(expression: impl Into<String>, timezone: impl Into<String>) -> Result<Self, DefinitionError> {
        Self::try_from(CronSpec {
            cron_schedule: expression.into(),
            timezone: timezone.into(),
        })
    }

    /// Expression as given.
    pub fn expression(&self) -> &str {
        &self.spec.cron_schedule
    }

    /// Timezone name as given.
    pub fn timezone(&self) -> &str {
        &self.spec.timezone
    }

    /// First tick strictly after `t`.
    pub fn next_tick_after(&self, t: Time) -> Option<Time> {
        self.schedule
            .after(&t.with_timezone(&self.tz))
            .next()
            .map(|tick| tick.with_timezone(&Utc))
    }

    /// Whether a tick lies in `(since, now]`. With no `since` the schedule is
    /// considered overdue.
    pub fn tick_crossed(&self, since: Option<Time>, now: Time) -> bool {
        match since {
            None => true,
            Some(since) => self.next_tick_after(since).is_some_and(|tick| tick <= now),
        }
    }
}

impl TryFrom<CronSpec> for CronTrigger {
    type Error = DefinitionError;

    fn try_from(spec: CronSpec) -> Result<Self, Self::Error> {
        let schedule = Schedule::from_str(&normalize(&spec.cron_schedule)).map_err(|e| {
            DefinitionError::InvalidCron {
                expression: spec.cron_schedule.clone(),
                reason: e.to_string(),
            }
        })?;
        let tz: Tz = spec
            .timezone
            .parse()
            .map_err(|_| DefinitionError::InvalidTimezone(spec.timezone.clone()))?;

        Ok(Self { spec, schedule, tz })
    }
}

impl From<CronTrigger> for CronSpec {
    fn from(trigger: CronTrigger) -> Self {
        trigger.spec
    }
}

impl PartialEq for CronTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

/// The cron crate wants a seconds field; standard 5-field expressions fire at
/// second zero.
fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}
