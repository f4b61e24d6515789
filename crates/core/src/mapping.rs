//! Partition mappings between dependent assets.

use serde::{Deserialize, Serialize};

use crate::{AssetKey, AssetPartition, PartitionKey, PartitionsDefinition, Time};

/// Strategy mapping a child partition to the parent partitions it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMapping {
    /// Same partition key on both sides
    Identity,
    /// Every partition of the parent
    AllPartitions,
    /// Only the most recent partition of the parent
    LastPartition,
}

impl PartitionMapping {
    /// Mapping used when an edge does not declare one.
    pub fn default_for(
        parent: Option<&PartitionsDefinition>,
        child: Option<&PartitionsDefinition>,
    ) -> Self {
        match (parent, child) {
            (Some(_), Some(_)) => Self::Identity,
            _ => Self::AllPartitions,
        }
    }

    /// Parent partitions read by `child_partition`.
    ///
    /// An unpartitioned parent always maps to its single implicit partition.
    pub fn upstream_partitions(
        &self,
        child_partition: Option<&PartitionKey>,
        parent: &AssetKey,
        parent_partitions: Option<&PartitionsDefinition>,
        now: Time,
    ) -> Vec<AssetPartition> {
        let Some(parent_def) = parent_partitions else {
            return vec![AssetPartition::unpartitioned(parent.clone())];
        };

        match self {
            Self::Identity => match child_partition {
                Some(key) if parent_def.contains(key, now) => {
                    vec![AssetPartition::new(parent.clone(), key.clone())]
                }
                Some(_) => Vec::new(),
                None => all_partitions(parent, parent_def, now),
            },
            Self::AllPartitions => all_partitions(parent, parent_def, now),
            Self::LastPartition => parent_def
                .last_partition(now)
                .map(|key| vec![AssetPartition::new(parent.clone(), key)])
                .unwrap_or_default(),
        }
    }
}

fn all_partitions(parent: &AssetKey, def: &PartitionsDefinition, now: Time) -> Vec<AssetPartition> {
    def.partition_keys(now)
        .into_iter()
        .map(|key| AssetPartition::new(parent.clone(), key))
        .collect()
}
