//! Rate-limited candidate selection.

use automat_core::{AssetPartition, PartitionsDefinition};

/// Orders materialization candidates by preference.
pub trait PartitionSelector: Send + Sync {
    /// Sort candidates, most preferred first.
    fn rank(&self, candidates: &mut [AssetPartition]);
}

/// Prefers the newest partitions. Time partition keys sort chronologically.
#[derive(Debug, Default, Clone, Copy)]
pub struct MostRecentSelector;

impl PartitionSelector for MostRecentSelector {
    fn rank(&self, candidates: &mut [AssetPartition]) {
        candidates.sort_by(|a, b| b.cmp(a));
    }
}

/// Stable lexicographic order, for statically partitioned and
/// unpartitioned assets.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicographicSelector;

impl PartitionSelector for LexicographicSelector {
    fn rank(&self, candidates: &mut [AssetPartition]) {
        candidates.sort();
    }
}

/// Candidates split by the rate limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Partitions to request this tick
    pub selected: Vec<AssetPartition>,
    /// Partitions dropped by the limit
    pub discarded: Vec<AssetPartition>,
}

/// Selector strategies available.
#[derive(Debug, Clone, Copy)]
pub enum SelectorStrategy {
    /// Newest first
    MostRecent(MostRecentSelector),
    /// Lexicographic
    Lexicographic(LexicographicSelector),
}

impl SelectorStrategy {
    /// Strategy suited to an asset's partitioning.
    pub fn for_partitions(def: Option<&PartitionsDefinition>) -> Self {
        match def {
            Some(def) if def.is_time_based() => Self::MostRecent(MostRecentSelector),
            _ => Self::Lexicographic(LexicographicSelector),
        }
    }

    /// Keep at most `limit` candidates, in preference order.
    pub fn select(&self, mut candidates: Vec<AssetPartition>, limit: usize) -> Selection {
        self.rank(&mut candidates);
        let discarded = if candidates.len() > limit {
            candidates.split_off(limit)
        } else {
            Vec::new()
        };
        Selection {
            selected: candidates,
            discarded,
        }
    }
}

impl PartitionSelector for SelectorStrategy {
    fn rank(&self, candidates: &mut [AssetPartition]) {
        match self {
            Self::MostRecent(s) => s.rank(candidates),
            Self::Lexicographic(s) => s.rank(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily(keys: &[&str]) -> Vec<AssetPartition> {
        keys.iter().map(|k| AssetPartition::new("events", *k)).collect()
    }

    #[test]
    fn test_most_recent_for_time_partitions() {
        let def = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let strategy = SelectorStrategy::for_partitions(Some(&def));

        let selection = strategy.select(daily(&["2024-01-02", "2024-01-05", "2024-01-03"]), 2);

        assert_eq!(selection.selected, daily(&["2024-01-05", "2024-01-03"]));
        assert_eq!(selection.discarded, daily(&["2024-01-02"]));
    }

    #[test]
    fn test_lexicographic_for_static_partitions() {
        let def = PartitionsDefinition::static_keys(["us", "eu", "apac"]);
        let strategy = SelectorStrategy::for_partitions(Some(&def));

        let selection = strategy.select(daily(&["us", "eu", "apac"]), 1);

        assert_eq!(selection.selected, daily(&["apac"]));
        assert_eq!(selection.discarded.len(), 2);
    }

    #[test]
    fn test_under_limit_keeps_everything() {
        let strategy = SelectorStrategy::for_partitions(None);
        let selection = strategy.select(vec![AssetPartition::unpartitioned("orders")], 1);

        assert_eq!(selection.selected.len(), 1);
        assert!(selection.discarded.is_empty());
    }
}
