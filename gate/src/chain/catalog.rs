use std::collections::{BTreeMap, BTreeSet};

use gate_config::shared::{ChainConfig, ValidationError};

/// Validated chains and the order they must be resolved in.
///
/// A chain whose virtual source depends on another chain comes after that chain. The order is
/// computed once, and ties keep the declaration order.
#[derive(Debug, Clone, Default)]
pub struct ChainCatalog {
    chains: BTreeMap<String, ChainConfig>,
    order: Vec<String>,
}

impl ChainCatalog {
    /// Validates `configs` and computes their dependency order.
    ///
    /// Fails on a duplicate chain, a dependency on an unknown chain, or a dependency cycle.
    pub fn new(configs: &[ChainConfig]) -> Result<Self, ValidationError> {
        let mut chains = BTreeMap::new();
        for config in configs {
            config.validate()?;
            if chains.insert(config.name.clone(), config.clone()).is_some() {
                return Err(ValidationError::DuplicateChain(config.name.clone()));
            }
        }

        let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for config in configs {
            let entry = dependencies.entry(config.name.as_str()).or_default();

            for source in config.sources.iter().filter(|s| s.is_virtual) {
                let Some(dependency) = source.depends_on.as_deref() else {
                    continue;
                };

                if !chains.contains_key(dependency) {
                    return Err(ValidationError::UnknownChainDependency {
                        chain: config.name.clone(),
                        source_name: source.name.clone(),
                        dependency: dependency.to_string(),
                    });
                }

                entry.insert(dependency);
            }
        }

        let mut order: Vec<String> = Vec::with_capacity(configs.len());
        let mut resolved: BTreeSet<&str> = BTreeSet::new();

        while order.len() < configs.len() {
            let next = configs.iter().find(|config| {
                !resolved.contains(config.name.as_str())
                    && dependencies
                        .get(config.name.as_str())
                        .is_none_or(|deps| deps.iter().all(|dep| resolved.contains(dep)))
            });

            let Some(next) = next else {
                let cycle = configs
                    .iter()
                    .filter(|config| !resolved.contains(config.name.as_str()))
                    .map(|config| config.name.clone())
                    .collect();

                return Err(ValidationError::ChainDependencyCycle(cycle));
            };

            resolved.insert(next.name.as_str());
            order.push(next.name.clone());
        }

        Ok(Self { chains, order })
    }

    /// Every chain in resolution order.
    pub fn ordered(&self) -> Vec<&ChainConfig> {
        self.order
            .iter()
            .filter_map(|name| self.chains.get(name))
            .collect()
    }

    /// The named chains plus every chain they transitively depend on, in resolution order.
    ///
    /// Unknown names are ignored.
    pub fn with_dependencies<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Vec<&ChainConfig> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        let mut pending: Vec<&str> = names
            .into_iter()
            .filter_map(|name| self.chains.get_key_value(name).map(|(key, _)| key.as_str()))
            .collect();

        while let Some(name) = pending.pop() {
            if !needed.insert(name) {
                continue;
            }

            if let Some(chain) = self.chains.get(name) {
                pending.extend(
                    chain
                        .sources
                        .iter()
                        .filter(|source| source.is_virtual)
                        .filter_map(|source| source.depends_on.as_deref()),
                );
            }
        }

        self.order
            .iter()
            .filter(|name| needed.contains(name.as_str()))
            .filter_map(|name| self.chains.get(name))
            .collect()
    }
}
