//! Static asset dependency graph.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::{
    AssetKey, AssetPartition, DefinitionError, PartitionMapping, PartitionsDefinition, Time,
};

/// An asset in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetNode {
    /// Asset key
    pub key: AssetKey,

    /// How the asset is partitioned, if at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionsDefinition>,
}

impl AssetNode {
    /// An unpartitioned asset.
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            partitions: None,
        }
    }

    /// Set the partitions definition.
    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }
}

/// A parent → child dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Upstream asset
    pub parent: AssetKey,

    /// Downstream asset
    pub child: AssetKey,

    /// Explicit partition mapping; the default is derived from both sides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<PartitionMapping>,
}

/// Builder that validates the graph before handing it out.
#[derive(Debug, Default)]
pub struct AssetGraphBuilder {
    nodes: Vec<AssetNode>,
    edges: Vec<DependencyEdge>,
}

impl AssetGraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset.
    pub fn add_asset(mut self, node: AssetNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a dependency using the default partition mapping.
    pub fn add_dependency(self, parent: impl Into<AssetKey>, child: impl Into<AssetKey>) -> Self {
        self.add_edge(DependencyEdge {
            parent: parent.into(),
            child: child.into(),
            mapping: None,
        })
    }

    /// Add a dependency with an explicit partition mapping.
    pub fn add_dependency_with_mapping(
        self,
        parent: impl Into<AssetKey>,
        child: impl Into<AssetKey>,
        mapping: PartitionMapping,
    ) -> Self {
        self.add_edge(DependencyEdge {
            parent: parent.into(),
            child: child.into(),
            mapping: Some(mapping),
        })
    }

    /// Add a prepared edge.
    pub fn add_edge(mut self, edge: DependencyEdge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Validate and build the graph.
    ///
    /// Rejects duplicate assets, edges to unknown assets and cycles.
    pub fn build(self) -> Result<AssetGraph, DefinitionError> {
        let mut nodes = BTreeMap::new();
        for node in self.nodes {
            node.partitions
                .as_ref()
                .map(|p| p.validate(node.key.as_str()))
                .transpose()?;
            let key = node.key.clone();
            if nodes.insert(key.clone(), node).is_some() {
                return Err(DefinitionError::DuplicateAsset(key));
            }
        }

        let mut upstream: BTreeMap<AssetKey, Vec<DependencyEdge>> = BTreeMap::new();
        let mut downstream: BTreeMap<AssetKey, BTreeSet<AssetKey>> = BTreeMap::new();
        for edge in self.edges {
            for key in [&edge.parent, &edge.child] {
                if !nodes.contains_key(key) {
                    return Err(DefinitionError::UnknownAsset(key.clone()));
                }
            }
            if edge.parent == edge.child {
                return Err(DefinitionError::CyclicDependency(vec![edge.parent]));
            }
            let parents = upstream.entry(edge.child.clone()).or_default();
            if parents.iter().any(|e| e.parent == edge.parent) {
                continue;
            }
            downstream
                .entry(edge.parent.clone())
                .or_default()
                .insert(edge.child.clone());
            parents.push(edge);
        }

        let order = topological_sort(&nodes, &upstream, &downstream)?;

        Ok(AssetGraph {
            nodes,
            upstream,
            downstream,
            order,
        })
    }
}

/// Kahn's algorithm; on failure, walks parent links among the leftovers to
/// report one concrete cycle.
fn topological_sort(
    nodes: &BTreeMap<AssetKey, AssetNode>,
    upstream: &BTreeMap<AssetKey, Vec<DependencyEdge>>,
    downstream: &BTreeMap<AssetKey, BTreeSet<AssetKey>>,
) -> Result<Vec<AssetKey>, DefinitionError> {
    let mut in_degree: BTreeMap<&AssetKey, usize> = nodes
        .keys()
        .map(|k| (k, upstream.get(k).map_or(0, Vec::len)))
        .collect();

    let mut ready: VecDeque<&AssetKey> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(key) = ready.pop_front() {
        order.push(key.clone());
        for child in downstream.get(key).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(child) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(child);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let remaining: HashSet<&AssetKey> = in_degree
        .iter()
        .filter(|(_, d)| **d > 0)
        .map(|(k, _)| *k)
        .collect();

    let mut path: Vec<AssetKey> = Vec::new();
    let mut current = remaining.iter().min().copied();
    while let Some(key) = current {
        if let Some(pos) = path.iter().position(|k| k == key) {
            let mut cycle = path.split_off(pos);
            cycle.reverse();
            return Err(DefinitionError::CyclicDependency(cycle));
        }
        path.push(key.clone());
        current = upstream
            .get(key)
            .and_then(|edges| edges.iter().map(|e| &e.parent).find(|p| remaining.contains(p)));
    }

    Err(DefinitionError::CyclicDependency(path))
}

/// Read-only dependency graph over asset keys.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    nodes: BTreeMap<AssetKey, AssetNode>,
    /// child -> incoming edges
    upstream: BTreeMap<AssetKey, Vec<DependencyEdge>>,
    /// parent -> children
    downstream: BTreeMap<AssetKey, BTreeSet<AssetKey>>,
    order: Vec<AssetKey>,
}

impl AssetGraph {
    /// Start building a graph.
    pub fn builder() -> AssetGraphBuilder {
        AssetGraphBuilder::new()
    }

    /// Whether the asset is defined.
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Look up an asset.
    pub fn node(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.nodes.get(key)
    }

    /// All asset keys, sorted.
    pub fn asset_keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.nodes.keys()
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no assets.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Partitions definition of an asset.
    pub fn partitions_def(&self, key: &AssetKey) -> Option<&PartitionsDefinition> {
        self.nodes.get(key).and_then(|n| n.partitions.as_ref())
    }

    /// Direct parents.
    pub fn parents_of(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.upstream
            .get(key)
            .map(|edges| edges.iter().map(|e| e.parent.clone()).collect())
            .unwrap_or_default()
    }

    /// Direct children.
    pub fn children_of(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.downstream.get(key).cloned().unwrap_or_default()
    }

    /// All transitive parents.
    pub fn ancestors(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.walk(key, |k| self.parents_of(k))
    }

    /// All transitive children.
    pub fn descendants(&self, key: &AssetKey) -> BTreeSet<AssetKey> {
        self.walk(key, |k| self.children_of(k))
    }

    fn walk<F>(&self, start: &AssetKey, next: F) -> BTreeSet<AssetKey>
    where
        F: Fn(&AssetKey) -> BTreeSet<AssetKey>,
    {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<AssetKey> = next(start).into_iter().collect();
        while let Some(key) = queue.pop_front() {
            if seen.insert(key.clone()) {
                queue.extend(next(&key));
            }
        }
        seen
    }

    /// Assets in dependency order (parents before children).
    pub fn topological_order(&self) -> &[AssetKey] {
        &self.order
    }

    /// Every partition of an asset that exists at `now`.
    pub fn asset_partitions(&self, key: &AssetKey, now: Time) -> Vec<AssetPartition> {
        let Some(node) = self.nodes.get(key) else {
            return Vec::new();
        };
        match &node.partitions {
            None => vec![AssetPartition::unpartitioned(key.clone())],
            Some(def) => def
                .partition_keys(now)
                .into_iter()
                .map(|p| AssetPartition::new(key.clone(), p))
                .collect(),
        }
    }

    /// Partitions of `parent` read by `child_partition`.
    pub fn mapped_upstream_partitions(
        &self,
        child_partition: &AssetPartition,
        parent: &AssetKey,
        now: Time,
    ) -> Vec<AssetPartition> {
        let Some(edge) = self
            .upstream
            .get(&child_partition.asset)
            .and_then(|edges| edges.iter().find(|e| &e.parent == parent))
        else {
            return Vec::new();
        };

        let parent_def = self.partitions_def(parent);
        let mapping = edge.mapping.unwrap_or_else(|| {
            PartitionMapping::default_for(parent_def, self.partitions_def(&child_partition.asset))
        });
        mapping.upstream_partitions(child_partition.partition.as_ref(), parent, parent_def, now)
    }

    /// Mapped upstream partitions, grouped by parent asset in key order.
    pub fn upstream_partitions(
        &self,
        child_partition: &AssetPartition,
        now: Time,
    ) -> Vec<(AssetKey, Vec<AssetPartition>)> {
        self.parents_of(&child_partition.asset)
            .into_iter()
            .map(|parent| {
                let mapped = self.mapped_upstream_partitions(child_partition, &parent, now);
                (parent, mapped)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn diamond() -> AssetGraph {
        AssetGraph::builder()
            .add_asset(AssetNode::new("a"))
            .add_asset(AssetNode::new("b"))
            .add_asset(AssetNode::new("c"))
            .add_asset(AssetNode::new("d"))
            .add_dependency("a", "b")
            .add_dependency("a", "c")
            .add_dependency("b", "d")
            .add_dependency("c", "d")
            .build()
            .unwrap()
    }

    #[test]
    fn test_parents_and_children() {
        let g = diamond();
        let d = AssetKey::new("d");
        let a = AssetKey::new("a");

        assert_eq!(g.parents_of(&d).len(), 2);
        assert_eq!(g.children_of(&a).len(), 2);
        assert!(g.parents_of(&a).is_empty());
        assert_eq!(g.ancestors(&d).len(), 3);
        assert_eq!(g.descendants(&a).len(), 3);
    }

    #[test]
    fn test_topological_order() {
        let g = diamond();
        let order = g.topological_order();
        let pos = |k: &str| order.iter().position(|x| x.as_str() == k).unwrap();

        assert_eq!(order.len(), 4);
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = AssetGraph::builder()
            .add_asset(AssetNode::new("a"))
            .add_asset(AssetNode::new("b"))
            .add_asset(AssetNode::new("c"))
            .add_dependency("a", "b")
            .add_dependency("b", "c")
            .add_dependency("c", "a")
            .build()
            .unwrap_err();

        match err {
            DefinitionError::CyclicDependency(cycle) => assert_eq!(cycle.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_edge_and_unknown_rejected() {
        let self_edge = AssetGraph::builder()
            .add_asset(AssetNode::new("a"))
            .add_dependency("a", "a")
            .build();
        assert!(matches!(self_edge, Err(DefinitionError::CyclicDependency(_))));

        let unknown = AssetGraph::builder()
            .add_asset(AssetNode::new("a"))
            .add_dependency("missing", "a")
            .build();
        assert_eq!(unknown.unwrap_err(), DefinitionError::UnknownAsset("missing".into()));
    }

    #[test]
    fn test_duplicate_asset_rejected() {
        let err = AssetGraph::builder()
            .add_asset(AssetNode::new("a"))
            .add_asset(AssetNode::new("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateAsset("a".into()));
    }

    #[test]
    fn test_partitioned_to_unpartitioned_maps_all() {
        let daily = PartitionsDefinition::daily(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let g = AssetGraph::builder()
            .add_asset(AssetNode::new("events").with_partitions(daily))
            .add_asset(AssetNode::new("summary"))
            .add_dependency("events", "summary")
            .build()
            .unwrap();
        let now = "2024-01-04T06:00:00Z".parse().unwrap();

        let mapped = g.mapped_upstream_partitions(
            &AssetPartition::unpartitioned("summary"),
            &"events".into(),
            now,
        );
        assert_eq!(mapped.len(), 3);
        assert_eq!(g.asset_partitions(&"events".into(), now).len(), 3);
        assert_eq!(g.asset_partitions(&"summary".into(), Utc::now()).len(), 1);
    }
}
