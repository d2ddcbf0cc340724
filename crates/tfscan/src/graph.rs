//! Reference graph over all loaded blocks
//!
//! One vertex per block instance, one edge per reference that could be resolved inside the
//! referencing block's module instance. Module inputs are connected as well: a `variable`
//! inside a module points at the module call that passes it a value.
//!
//! The graph answers two questions for the runner: relational checks walk it, and
//! breadcrumbs describe through which variables and locals an attribute got its value.
use crate::address::nested_address;
use crate::config::AddressingStrategy;
use crate::definitions::{Block, BlockKind, BlockType, DefinitionKey, Definitions, ModuleSource};
use crate::util::report_path;
use crate::value::Value;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Roots of traversals that never name a block
const BUILTIN_ROOTS: [&str; 5] = ["count", "each", "self", "path", "terraform"];

#[derive(Clone, Debug)]
pub struct Vertex {
    pub block_type: BlockType,
    /// `aws_s3_bucket.logs`, `network`, `region`
    pub block_name: String,
    pub key: DefinitionKey,
    /// nested address, independent of the run's addressing strategy
    pub address: String,
    pub config: Value,
    pub tags: IndexMap<String, Value>,
    pub context_path: Vec<String>,
    /// resource/data type, empty for other block types
    pub resource_type: String,
}

impl Vertex {
    fn new(key: &DefinitionKey, block: &Block) -> Self {
        let resource_type = match &block.kind {
            BlockKind::Resource { type_name, .. } | BlockKind::Data { type_name, .. } => {
                type_name.clone()
            }
            _ => String::new(),
        };

        Self {
            block_type: block.block_type(),
            block_name: block.block_name(),
            key: key.clone(),
            address: block
                .address
                .clone()
                .unwrap_or_else(|| nested_address(key, block)),
            config: block.config.clone(),
            tags: block.tags(),
            context_path: block.context_path(),
            resource_type,
        }
    }

    pub fn file_path(&self) -> &Path {
        self.key.path()
    }
}

/// Module instance a file belongs to: its directory plus the call that loaded it
pub(crate) type Scope = (PathBuf, Option<Arc<ModuleSource>>);

pub(crate) fn scope_of(key: &DefinitionKey) -> Scope {
    (
        key.file_path.parent().map(Path::to_path_buf).unwrap_or_default(),
        key.source_module.clone(),
    )
}

#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<Vertex, String>,
}

impl ReferenceGraph {
    pub fn build(definitions: &Definitions) -> Self {
        let mut graph: DiGraph<Vertex, String> = DiGraph::new();
        let mut scopes: HashMap<Scope, HashMap<String, NodeIndex>> = HashMap::new();
        let mut pending = vec![];

        for (key, file) in definitions.iter() {
            let scope = scopes.entry(scope_of(key)).or_default();
            for block in file.iter() {
                let index = graph.add_node(Vertex::new(key, block));
                scope.insert(block.local_address(), index);
                pending.push((index, key, block));
            }
        }

        for (index, key, block) in &pending {
            let Some(scope) = scopes.get(&scope_of(key)) else {
                continue;
            };

            for reference in &block.references {
                let Some(target) = target_address(&reference.target) else {
                    continue;
                };
                match scope.get(&target) {
                    Some(target_index) if target_index != index => {
                        graph.add_edge(*index, *target_index, reference.attribute.clone());
                    }
                    Some(_) => {}
                    None => tracing::trace!(file=%key, %target, "reference target not found"),
                }
            }

            // module inputs: variable → module call passing the value
            if let BlockKind::Variable { name } = &block.kind {
                let Some(source) = key.source_module.as_deref() else {
                    continue;
                };
                let passes_value = definitions
                    .get(&source.caller)
                    .and_then(|caller| {
                        caller
                            .blocks_of(BlockType::Module)
                            .iter()
                            .find(|call| call.local_name() == source.name)
                    })
                    .is_some_and(|call| call.config.get(name).is_some());
                if !passes_value {
                    continue;
                }

                let call_index = scopes
                    .get(&scope_of(&source.caller))
                    .and_then(|caller_scope| caller_scope.get(&format!("module.{}", source.name)));
                if let Some(call_index) = call_index {
                    graph.add_edge(*index, *call_index, name.clone());
                }
            }
        }

        tracing::debug!(
            vertices = graph.node_count(),
            edges = graph.edge_count(),
            "reference graph built"
        );
        Self { graph }
    }

    pub fn vertices(&self) -> impl Iterator<Item = (NodeIndex, &Vertex)> {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    pub fn vertex(&self, index: NodeIndex) -> &Vertex {
        &self.graph[index]
    }

    /// Vertices of one resource type
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (NodeIndex, &'a Vertex)> + 'a {
        self.vertices().filter(move |(_, vertex)| {
            vertex.block_type == BlockType::Resource && vertex.resource_type == resource_type
        })
    }

    /// `(attribute, target)` for every reference made by `index`
    pub fn references_from(&self, index: NodeIndex) -> impl Iterator<Item = (&str, NodeIndex)> {
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (edge.weight().as_str(), edge.target()))
    }

    /// `(attribute, source)` for every reference pointing at `index`
    pub fn referenced_by(&self, index: NodeIndex) -> impl Iterator<Item = (&str, NodeIndex)> {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| (edge.weight().as_str(), edge.source()))
    }

    /// Breadcrumbs of every resource and data vertex
    ///
    /// Keyed by report file path, then by entity key (the address with nested addressing,
    /// `type.name` otherwise), then by attribute.
    pub fn breadcrumbs(&self, root: &Path, strategy: AddressingStrategy) -> Breadcrumbs {
        let mut breadcrumbs = Breadcrumbs::default();

        for (index, vertex) in self.vertices() {
            if !matches!(vertex.block_type, BlockType::Resource | BlockType::Data) {
                continue;
            }

            let mut attributes: IndexMap<String, Vec<BreadcrumbStep>> = IndexMap::new();
            for (attribute, target) in self.references_from(index) {
                if !is_value_source(self.vertex(target).block_type) {
                    continue;
                }
                let mut visited = HashSet::from([index]);
                let trail = self.trail(target, None, root, &mut visited);
                attributes.entry(attribute.to_string()).or_default().extend(trail);
            }

            if attributes.is_empty() {
                continue;
            }

            let entity_key = match strategy {
                AddressingStrategy::Nested => vertex.address.clone(),
                AddressingStrategy::Referrer => vertex.block_name.clone(),
            };
            breadcrumbs
                .entry(report_path(vertex.file_path(), root))
                .or_default()
                .insert(entity_key, attributes);
        }

        breadcrumbs
    }

    /// Steps from a variable, local or module call towards the values it is built from
    ///
    /// `argument` restricts a module call to the references of one of its arguments.
    fn trail(
        &self,
        index: NodeIndex,
        argument: Option<&str>,
        root: &Path,
        visited: &mut HashSet<NodeIndex>,
    ) -> Vec<BreadcrumbStep> {
        if !visited.insert(index) {
            return vec![];
        }

        let vertex = self.vertex(index);
        let mut steps = vec![BreadcrumbStep {
            vertex_type: vertex.block_type,
            name: vertex.block_name.clone(),
            path: report_path(vertex.file_path(), root),
            module_connection: argument.is_some(),
        }];

        for (attribute, target) in self.references_from(index) {
            if let Some(argument) = argument {
                let own_argument = attribute == argument
                    || attribute.starts_with(&format!("{argument}."));
                if !own_argument {
                    continue;
                }
            }

            let target_type = self.vertex(target).block_type;
            if vertex.block_type == BlockType::Variable && target_type == BlockType::Module {
                steps.extend(self.trail(target, Some(attribute), root, visited));
            } else if is_value_source(target_type) {
                steps.extend(self.trail(target, None, root, visited));
            }
        }

        steps
    }
}

fn is_value_source(block_type: BlockType) -> bool {
    matches!(block_type, BlockType::Variable | BlockType::Locals)
}

/// Local address named by a traversal, `None` for builtins like `each.key`
fn target_address(target: &[String]) -> Option<String> {
    match target {
        [root, name, ..] if root == "var" => Some(format!("var.{name}")),
        [root, name, ..] if root == "local" => Some(format!("local.{name}")),
        [root, name, ..] if root == "module" => Some(format!("module.{name}")),
        [root, type_name, name, ..] if root == "data" => Some(format!("data.{type_name}.{name}")),
        [root, ..] if BUILTIN_ROOTS.contains(&root.as_str()) => None,
        [type_name, name, ..] => Some(format!("{type_name}.{name}")),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct BreadcrumbStep {
    #[serde(rename = "type")]
    pub vertex_type: BlockType,
    pub name: String,
    pub path: String,
    pub module_connection: bool,
}

/// attribute → steps
pub type EntityBreadcrumbs = IndexMap<String, Vec<BreadcrumbStep>>;
/// report file path → entity key → attribute breadcrumbs
pub type Breadcrumbs = IndexMap<String, IndexMap<String, EntityBreadcrumbs>>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::assign_addresses;
    use crate::definitions;
    use pretty_assertions::assert_eq;

    fn graph() -> ReferenceGraph {
        let mut definitions = definitions! {
            "main.tf" => r#"
variable "env" {
  default = "prod"
}

locals {
  prefix = "acme-${var.env}"
}

resource "aws_s3_bucket" "logs" {
  bucket = "${local.prefix}-logs"
}

resource "aws_s3_bucket_public_access_block" "logs" {
  bucket = aws_s3_bucket.logs.id
}
"#
        };
        assign_addresses(&mut definitions);
        ReferenceGraph::build(&definitions)
    }

    fn find(graph: &ReferenceGraph, address: &str) -> NodeIndex {
        graph
            .vertices()
            .find(|(_, vertex)| vertex.address == address)
            .map(|(index, _)| index)
            .unwrap()
    }

    #[test]
    fn edges_follow_references() {
        let graph = graph();
        let bucket = find(&graph, "aws_s3_bucket.logs");
        let referrers: Vec<String> = graph
            .referenced_by(bucket)
            .map(|(_, source)| graph.vertex(source).address.clone())
            .collect();
        assert_eq!(referrers, vec!["aws_s3_bucket_public_access_block.logs"]);
    }

    #[test]
    fn breadcrumbs_follow_locals_to_variables() {
        let graph = graph();
        let breadcrumbs = graph.breadcrumbs(Path::new(""), AddressingStrategy::Nested);
        let steps = &breadcrumbs["/main.tf"]["aws_s3_bucket.logs"]["bucket"];
        let names: Vec<(&str, &str)> = steps
            .iter()
            .map(|step| (step.vertex_type.as_str(), step.name.as_str()))
            .collect();
        assert_eq!(names, vec![("locals", "prefix"), ("variable", "env")]);
    }

    #[test]
    fn builtin_roots_are_not_targets() {
        assert_eq!(target_address(&["each".into(), "key".into()]), None);
        assert_eq!(
            target_address(&["aws_vpc".into(), "main".into(), "id".into()]).as_deref(),
            Some("aws_vpc.main")
        );
    }
}
