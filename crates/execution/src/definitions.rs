//! Validated scheduler definitions.
//!
//! Definitions are loaded once, either through [`DefinitionsBuilder`] or from
//! a JSON [`DefinitionsSpec`] document, and are immutable afterwards.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use automat_core::{
    AssetGraph, AssetKey, AssetNode, DefinitionError, DependencyEdge, FreshnessCheckSpec, PartitionMapping,
    PartitionsDefinition, SensorBinding, SensorBindings,
};
use automat_policy::AutomationPolicy;
use serde::{Deserialize, Serialize};

use crate::{LoadError, SchedulerConfig};

/// Everything the harness needs, checked for consistency.
#[derive(Debug, Clone)]
pub struct Definitions {
    graph: Arc<AssetGraph>,
    policies: Arc<HashMap<AssetKey, AutomationPolicy>>,
    checks: Arc<Vec<FreshnessCheckSpec>>,
    bindings: SensorBindings,
    config: SchedulerConfig,
}

impl Definitions {
    /// Start building definitions over a graph.
    pub fn builder(graph: AssetGraph) -> DefinitionsBuilder {
        DefinitionsBuilder::new(graph)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let spec: DefinitionsSpec = serde_json::from_str(json)?;
        Ok(spec.into_definitions()?)
    }

    /// Read, parse and validate a JSON document.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    /// Asset graph.
    pub fn graph(&self) -> &Arc<AssetGraph> {
        &self.graph
    }

    /// Policy attached to an asset.
    pub fn policy(&self, asset: &AssetKey) -> Option<&AutomationPolicy> {
        self.policies.get(asset)
    }

    /// All policies.
    pub fn policies(&self) -> &Arc<HashMap<AssetKey, AutomationPolicy>> {
        &self.policies
    }

    /// Freshness checks.
    pub fn checks(&self) -> &Arc<Vec<FreshnessCheckSpec>> {
        &self.checks
    }

    /// Sensor bindings, including the default one.
    pub fn bindings(&self) -> &SensorBindings {
        &self.bindings
    }

    /// Scheduler settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

/// Builder for [`Definitions`].
#[derive(Debug)]
pub struct DefinitionsBuilder {
    graph: AssetGraph,
    policies: Vec<(AssetKey, AutomationPolicy)>,
    checks: Vec<FreshnessCheckSpec>,
    bindings: Vec<SensorBinding>,
    config: SchedulerConfig,
}

impl DefinitionsBuilder {
    /// Create a builder over a graph.
    pub fn new(graph: AssetGraph) -> Self {
        Self {
            graph,
            policies: Vec::new(),
            checks: Vec::new(),
            bindings: Vec::new(),
            config: SchedulerConfig::default(),
        }
    }

    /// Attach a policy to an asset.
    pub fn with_policy(mut self, asset: impl Into<AssetKey>, policy: AutomationPolicy) -> Self {
        self.policies.push((asset.into(), policy));
        self
    }

    /// Add a freshness check.
    pub fn with_check(mut self, check: FreshnessCheckSpec) -> Self {
        self.checks.push(check);
        self
    }

    /// Add an explicit sensor binding.
    pub fn with_binding(mut self, binding: SensorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Set scheduler configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Definitions, DefinitionError> {
        self.config.validate()?;

        let mut policies = HashMap::new();
        for (asset, policy) in self.policies {
            if !self.graph.contains(&asset) {
                return Err(DefinitionError::UnknownAsset(asset));
            }
            policy.validate(&asset)?;
            if policies.insert(asset.clone(), policy).is_some() {
                return Err(DefinitionError::InvalidPolicy {
                    asset,
                    reason: "more than one policy attached".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for check in &self.checks {
            if !self.graph.contains(check.asset()) {
                return Err(DefinitionError::UnknownAsset(check.asset().clone()));
            }
            if !seen.insert((check.asset().clone(), check.name.clone())) {
                return Err(DefinitionError::DuplicateCheck {
                    asset: check.asset().clone(),
                    name: check.name.clone(),
                });
            }
        }

        let automated: BTreeSet<AssetKey> = policies.keys().cloned().collect();
        let bindings =
            SensorBindings::resolve(self.bindings, &automated, self.config.minimum_interval_seconds)?;

        Ok(Definitions {
            graph: Arc::new(self.graph),
            policies: Arc::new(policies),
            checks: Arc::new(self.checks),
            bindings,
            config: self.config,
        })
    }
}

/// An upstream dependency in a definitions document: either a bare asset key
/// or a key with an explicit partition mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Default mapping
    Key(AssetKey),
    /// Explicit mapping
    Mapped {
        /// Upstream asset
        asset: AssetKey,
        /// Partition mapping
        mapping: PartitionMapping,
    },
}

/// One asset in a definitions document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Asset key
    pub key: AssetKey,

    /// Partitions definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionsDefinition>,

    /// Upstream assets
    #[serde(default)]
    pub deps: Vec<DependencySpec>,

    /// Automation policy; assets without one are never requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<AutomationPolicy>,
}

/// Serialized definitions document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionsSpec {
    /// Assets with their dependencies and policies
    pub assets: Vec<AssetSpec>,

    /// Freshness checks
    #[serde(default)]
    pub checks: Vec<FreshnessCheckSpec>,

    /// Explicit sensor bindings
    #[serde(default)]
    pub sensors: Vec<SensorBinding>,

    /// Scheduler settings
    #[serde(default)]
    pub config: SchedulerConfig,
}

impl DefinitionsSpec {
    /// Build the graph and validate everything.
    pub fn into_definitions(self) -> Result<Definitions, DefinitionError> {
        let mut graph = AssetGraph::builder();
        let mut policies = Vec::new();

        for asset in self.assets {
            let mut node = AssetNode::new(asset.key.clone());
            node.partitions = asset.partitions;
            graph = graph.add_asset(node);

            for dep in asset.deps {
                let (parent, mapping) = match dep {
                    DependencySpec::Key(parent) => (parent, None),
                    DependencySpec::Mapped { asset: parent, mapping } => (parent, Some(mapping)),
                };
                graph = graph.add_edge(DependencyEdge {
                    parent,
                    child: asset.key.clone(),
                    mapping,
                });
            }

            if let Some(policy) = asset.policy {
                policies.push((asset.key, policy));
            }
        }

        let mut builder = DefinitionsBuilder::new(graph.build()?).with_config(self.config);
        for (asset, policy) in policies {
            builder = builder.with_policy(asset, policy);
        }
        for check in self.checks {
            builder = builder.with_check(check);
        }
        for binding in self.sensors {
            builder = builder.with_binding(binding);
        }
        builder.build()
    }
}
