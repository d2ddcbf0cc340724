//! Canonical resource addresses
//!
//! Two strategies exist and exactly one is active per run:
//!
//! - **nested**: [assign_addresses] computes every block's address up front from the module
//!   chain of the file it was loaded through (`module.network[0].aws_subnet.public`). Lookups
//!   read the stored address.
//! - **referrer**: addresses are reconstructed on demand by finding the module call whose
//!   resolved child paths contain the file's legacy key. Only the innermost call contributes
//!   (`module.network.aws_subnet.public`) and instance indices are not distinguished.
//!   Lookups are memoized by [ReferrerCache].
use crate::config::AddressingStrategy;
use crate::definitions::{Block, DefinitionKey, Definitions};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Address of a block that was loaded through `key`
pub fn nested_address(key: &DefinitionKey, block: &Block) -> String {
    match key.module_address() {
        Some(prefix) => format!("{prefix}.{}", block.local_address()),
        None => block.local_address(),
    }
}

/// Compute and store the nested address of every block
pub fn assign_addresses(definitions: &mut Definitions) {
    for (key, file) in definitions.iter_mut() {
        for block in file.blocks.values_mut().flatten() {
            block.address = Some(nested_address(key, block));
        }
    }
}

/// Computes entity ids with the strategy selected for the run
#[derive(Debug)]
pub enum AddressResolver {
    Nested,
    Referrer(ReferrerCache),
}

impl AddressResolver {
    pub fn new(strategy: AddressingStrategy) -> Self {
        match strategy {
            AddressingStrategy::Nested => AddressResolver::Nested,
            AddressingStrategy::Referrer => AddressResolver::Referrer(ReferrerCache::default()),
        }
    }

    pub fn strategy(&self) -> AddressingStrategy {
        match self {
            AddressResolver::Nested => AddressingStrategy::Nested,
            AddressResolver::Referrer(_) => AddressingStrategy::Referrer,
        }
    }

    /// Canonical address of `block`, declared in the file identified by `key`
    pub fn resolve(&mut self, definitions: &Definitions, key: &DefinitionKey, block: &Block) -> String {
        match self {
            AddressResolver::Nested => block
                .address
                .clone()
                .unwrap_or_else(|| nested_address(key, block)),
            AddressResolver::Referrer(cache) => {
                let local = block.local_address();
                if key.source_module.is_none() {
                    return local;
                }

                match cache.find_referrer(definitions, &key.legacy_key()) {
                    Some(referrer) => format!("{referrer}.{local}"),
                    None => {
                        tracing::debug!(file=%key, "unable to find referrer id");
                        local
                    }
                }
            }
        }
    }

    /// Module call referring to `key`, only available with referrer addressing
    pub fn referrer(&mut self, definitions: &Definitions, key: &DefinitionKey) -> Option<String> {
        match self {
            AddressResolver::Nested => None,
            AddressResolver::Referrer(cache) => {
                key.source_module.as_ref()?;
                cache.find_referrer(definitions, &key.legacy_key())
            }
        }
    }
}

#[derive(Debug)]
struct IndexedModule {
    name: String,
    resolved_child_paths: Vec<String>,
}

/// Memoized lookup from a legacy file key to the module call that referred to it
///
/// The index of module calls is built lazily on the first miss and never rebuilt;
/// positive and negative results are cached per key.
#[derive(Debug, Default)]
pub struct ReferrerCache {
    referrers: HashMap<String, String>,
    non_referred: HashSet<String>,
    /// file → module calls with resolved child paths
    modules_index: Option<IndexMap<String, Vec<IndexedModule>>>,
    scans: usize,
}

impl ReferrerCache {
    #[tracing::instrument(level = "trace", skip(self, definitions))]
    pub fn find_referrer(&mut self, definitions: &Definitions, legacy_key: &str) -> Option<String> {
        if let Some(cached) = self.referrers.get(legacy_key) {
            return Some(cached.clone());
        }
        if self.non_referred.contains(legacy_key) {
            return None;
        }

        self.scans += 1;
        let index = self
            .modules_index
            .get_or_insert_with(|| build_modules_index(definitions));

        for modules in index.values() {
            for module in modules {
                if module.resolved_child_paths.iter().any(|path| path == legacy_key) {
                    let referrer = format!("module.{}", module.name);
                    self.referrers.insert(legacy_key.to_string(), referrer.clone());
                    return Some(referrer);
                }
            }
        }

        self.non_referred.insert(legacy_key.to_string());
        None
    }

    /// Number of lookups that had to search the module index
    pub fn scans(&self) -> usize {
        self.scans
    }
}

fn build_modules_index(definitions: &Definitions) -> IndexMap<String, Vec<IndexedModule>> {
    let mut index = IndexMap::new();
    for (key, file) in definitions.iter() {
        let modules: Vec<IndexedModule> = file
            .module_calls()
            .filter(|call| !call.resolved_child_paths.is_empty())
            .map(|call| IndexedModule {
                name: call.name.clone(),
                resolved_child_paths: call
                    .resolved_child_paths
                    .iter()
                    .map(DefinitionKey::legacy_key)
                    .collect(),
            })
            .collect();

        if !modules.is_empty() {
            index.insert(key.legacy_key(), modules);
        }
    }
    tracing::debug!(files = index.len(), "built index of files with module calls");
    index
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::{BlockKind, BlockType, FileDefinition, InstanceKey, ModuleCall, ModuleSource};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn subnet() -> Block {
        Block::new(
            BlockKind::Resource {
                type_name: "aws_subnet".into(),
                name: "public".into(),
            },
            Value::Null,
        )
    }

    /// `main.tf` calls module `network` with `count = instances`
    fn network_definitions(instances: usize) -> (Definitions, Vec<DefinitionKey>) {
        let root = DefinitionKey::new("main.tf");
        let children: Vec<DefinitionKey> = (0..instances)
            .map(|index| {
                DefinitionKey::with_module(
                    "network/main.tf",
                    ModuleSource {
                        caller: root.clone(),
                        name: "network".into(),
                        instance: (instances > 1).then_some(InstanceKey::Index(index)),
                        ordinal: index,
                    },
                )
            })
            .collect();

        let mut root_file = FileDefinition::default();
        root_file.push(Block::new(
            BlockKind::Module(ModuleCall {
                name: "network".into(),
                source: Some("./network".into()),
                resolved_child_paths: children.clone(),
            }),
            Value::Null,
        ));

        let mut definitions = Definitions::default();
        definitions.insert(root, root_file);
        for child in &children {
            let mut file = FileDefinition::default();
            file.push(subnet());
            definitions.insert(child.clone(), file);
        }
        assign_addresses(&mut definitions);
        (definitions, children)
    }

    fn subnet_address(definitions: &Definitions, key: &DefinitionKey, resolver: &mut AddressResolver) -> String {
        let block = &definitions.get(key).unwrap().blocks_of(BlockType::Resource)[0];
        resolver.resolve(definitions, key, block)
    }

    #[test]
    fn nested_single_call() {
        let (definitions, children) = network_definitions(1);
        let mut resolver = AddressResolver::new(AddressingStrategy::Nested);
        assert_eq!(
            subnet_address(&definitions, &children[0], &mut resolver),
            "module.network.aws_subnet.public"
        );
    }

    #[test]
    fn nested_count_yields_distinct_addresses() {
        let (definitions, children) = network_definitions(2);
        let mut resolver = AddressResolver::new(AddressingStrategy::Nested);
        let addresses: Vec<String> = children
            .iter()
            .map(|key| subnet_address(&definitions, key, &mut resolver))
            .collect();
        assert_eq!(
            addresses,
            vec![
                "module.network[0].aws_subnet.public",
                "module.network[1].aws_subnet.public"
            ]
        );
    }

    #[test]
    fn referrer_lookup_is_cached() {
        let (definitions, children) = network_definitions(1);
        let mut cache = ReferrerCache::default();
        let key = children[0].legacy_key();
        assert_eq!(key, "network/main.tf[main.tf#0]");

        assert_eq!(cache.find_referrer(&definitions, &key).as_deref(), Some("module.network"));
        assert_eq!(cache.scans(), 1);
        assert_eq!(cache.find_referrer(&definitions, &key).as_deref(), Some("module.network"));
        assert_eq!(cache.scans(), 1);
    }

    #[test]
    fn referrer_misses_are_cached() {
        let (definitions, _) = network_definitions(1);
        let mut cache = ReferrerCache::default();
        assert_eq!(cache.find_referrer(&definitions, "other.tf[main.tf#9]"), None);
        assert_eq!(cache.find_referrer(&definitions, "other.tf[main.tf#9]"), None);
        assert_eq!(cache.scans(), 1);
    }

    #[test]
    fn referrer_addressing_drops_instance_index() {
        let (definitions, children) = network_definitions(2);
        let mut resolver = AddressResolver::new(AddressingStrategy::Referrer);
        for key in &children {
            assert_eq!(
                subnet_address(&definitions, key, &mut resolver),
                "module.network.aws_subnet.public"
            );
        }
    }
}
