//! Sensor bindings: which assets are evaluated on which cadence.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{AssetKey, DefinitionError};

/// Name of the catch-all binding for assets without an explicit one.
pub const DEFAULT_BINDING_NAME: &str = "default_automation_sensor";

/// Default evaluation cadence.
pub const DEFAULT_MINIMUM_INTERVAL_SECONDS: u64 = 30;

fn default_interval() -> u64 {
    DEFAULT_MINIMUM_INTERVAL_SECONDS
}

/// A recurring evaluation trigger over a set of assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorBinding {
    /// Binding name
    pub name: String,

    /// Targeted assets
    pub assets: BTreeSet<AssetKey>,

    /// Minimum time between tick starts
    #[serde(default = "default_interval")]
    pub minimum_interval_seconds: u64,
}

impl SensorBinding {
    /// Create a binding with the default cadence.
    pub fn new<I, K>(name: impl Into<String>, assets: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        Self {
            name: name.into(),
            assets: assets.into_iter().map(Into::into).collect(),
            minimum_interval_seconds: DEFAULT_MINIMUM_INTERVAL_SECONDS,
        }
    }

    /// Set the cadence.
    pub fn with_minimum_interval_seconds(mut self, seconds: u64) -> Self {
        self.minimum_interval_seconds = seconds;
        self
    }
}

/// Validated set of bindings, including the default catch-all.
#[derive(Debug, Clone, Default)]
pub struct SensorBindings {
    bindings: Vec<SensorBinding>,
    by_asset: BTreeMap<AssetKey, usize>,
}

impl SensorBindings {
    /// Validate explicit bindings and assign every remaining automated asset
    /// to the default binding.
    ///
    /// `automated` is the set of assets that carry a policy; explicit
    /// bindings may only target those.
    pub fn resolve(
        explicit: Vec<SensorBinding>,
        automated: &BTreeSet<AssetKey>,
        default_interval_seconds: u64,
    ) -> Result<Self, DefinitionError> {
        let mut names = BTreeSet::new();
        let mut owner: BTreeMap<AssetKey, String> = BTreeMap::new();

        for binding in &explicit {
            if binding.name == DEFAULT_BINDING_NAME || !names.insert(binding.name.clone()) {
                return Err(DefinitionError::DuplicateBindingName(binding.name.clone()));
            }
            if binding.minimum_interval_seconds == 0 {
                return Err(DefinitionError::InvalidConfig {
                    field: format!("{}.minimum_interval_seconds", binding.name),
                    reason: "must be at least 1".to_string(),
                });
            }
            for asset in &binding.assets {
                if !automated.contains(asset) {
                    return Err(DefinitionError::UnknownAsset(asset.clone()));
                }
                if let Some(first) = owner.insert(asset.clone(), binding.name.clone()) {
                    return Err(DefinitionError::DuplicateBinding {
                        asset: asset.clone(),
                        first,
                        second: binding.name.clone(),
                    });
                }
            }
        }

        let unbound: BTreeSet<AssetKey> = automated
            .iter()
            .filter(|k| !owner.contains_key(*k))
            .cloned()
            .collect();

        let mut bindings = explicit;
        if !unbound.is_empty() {
            bindings.push(SensorBinding {
                name: DEFAULT_BINDING_NAME.to_string(),
                assets: unbound,
                minimum_interval_seconds: default_interval_seconds,
            });
        }

        let by_asset = bindings
            .iter()
            .enumerate()
            .flat_map(|(i, b)| b.assets.iter().map(move |a| (a.clone(), i)))
            .collect();

        Ok(Self { bindings, by_asset })
    }

    /// Binding that evaluates `asset`.
    pub fn binding_for(&self, asset: &AssetKey) -> Option<&SensorBinding> {
        self.by_asset.get(asset).map(|i| &self.bindings[*i])
    }

    /// Look up a binding by name.
    pub fn get(&self, name: &str) -> Option<&SensorBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// All bindings, explicit ones first.
    pub fn iter(&self) -> impl Iterator<Item = &SensorBinding> {
        self.bindings.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn automated(keys: &[&str]) -> BTreeSet<AssetKey> {
        keys.iter().map(|k| AssetKey::from(*k)).collect()
    }

    #[test]
    fn test_unbound_assets_fall_back_to_default() {
        let bindings = SensorBindings::resolve(
            vec![SensorBinding::new("hourly", ["a"])],
            &automated(&["a", "b", "c"]),
            30,
        )
        .unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings.binding_for(&"a".into()).unwrap().name, "hourly");
        let default = bindings.binding_for(&"b".into()).unwrap();
        assert_eq!(default.name, DEFAULT_BINDING_NAME);
        assert_eq!(default.assets.len(), 2);
    }

    #[test]
    fn test_asset_in_two_bindings_rejected() {
        let err = SensorBindings::resolve(
            vec![SensorBinding::new("first", ["a"]), SensorBinding::new("second", ["a"])],
            &automated(&["a"]),
            30,
        )
        .unwrap_err();

        assert_eq!(
            err,
            DefinitionError::DuplicateBinding {
                asset: "a".into(),
                first: "first".into(),
                second: "second".into(),
            }
        );
    }

    #[test]
    fn test_no_default_when_everything_bound() {
        let bindings =
            SensorBindings::resolve(vec![SensorBinding::new("all", ["a"])], &automated(&["a"]), 30).unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(bindings.get(DEFAULT_BINDING_NAME).is_none());
    }

    #[test]
    fn test_reserved_name_rejected() {
        let err = SensorBindings::resolve(
            vec![SensorBinding::new(DEFAULT_BINDING_NAME, ["a"])],
            &automated(&["a"]),
            30,
        );
        assert!(matches!(err, Err(DefinitionError::DuplicateBindingName(_))));
    }
}
