//! Typed model of loaded configuration blocks
//!
//! [Definitions] maps a [DefinitionKey] (one file, possibly instantiated through a chain of
//! module calls) to the blocks declared in it. Every block is a [Block] with a fixed
//! [BlockKind]; the shape of its configuration is left to the checks as a [Value] tree.
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Block types that are dispatched to check registries
pub const CHECK_BLOCK_TYPES: [BlockType; 4] = [
    BlockType::Resource,
    BlockType::Data,
    BlockType::Provider,
    BlockType::Module,
];

/// Identity of one loaded file
///
/// A root file only has a path. A file loaded through a module call also remembers the
/// call that instantiated it, so the same file called twice yields two distinct keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionKey {
    pub file_path: PathBuf,
    pub source_module: Option<Arc<ModuleSource>>,
}

/// The module call instance a file was loaded through
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleSource {
    /// file containing the `module` block
    pub caller: DefinitionKey,
    /// local name of the `module` block
    pub name: String,
    /// `count`/`for_each` instance, `None` for a singular call
    pub instance: Option<InstanceKey>,
    /// position of this (call, instance) pair among all module instances of the caller
    pub ordinal: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    Index(usize),
    Key(String),
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceKey::Index(index) => write!(f, "[{index}]"),
            InstanceKey::Key(key) => write!(f, "[\"{key}\"]"),
        }
    }
}

impl DefinitionKey {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            source_module: None,
        }
    }

    pub fn with_module(file_path: impl Into<PathBuf>, source: ModuleSource) -> Self {
        Self {
            file_path: file_path.into(),
            source_module: Some(Arc::new(source)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Module call chain, outermost call first
    pub fn module_chain(&self) -> Vec<&ModuleSource> {
        let mut chain = vec![];
        let mut current = self.source_module.as_deref();
        while let Some(source) = current {
            chain.push(source);
            current = source.caller.source_module.as_deref();
        }
        chain.reverse();
        chain
    }

    /// Address prefix contributed by the module chain, e.g. `module.network[0].module.subnet`
    pub fn module_address(&self) -> Option<String> {
        let chain = self.module_chain();
        if chain.is_empty() {
            return None;
        }

        Some(
            chain
                .iter()
                .map(|source| match &source.instance {
                    Some(instance) => format!("module.{}{instance}", source.name),
                    None => format!("module.{}", source.name),
                })
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    /// String encoding used by referrer addressing: `file[caller#ordinal]`
    pub fn legacy_key(&self) -> String {
        match &self.source_module {
            None => self.file_path.display().to_string(),
            Some(source) => format!(
                "{}[{}#{}]",
                self.file_path.display(),
                source.caller.legacy_key(),
                source.ordinal
            ),
        }
    }

    /// Split a legacy key into its file path and referrer part
    ///
    /// `a/main.tf[main.tf#0]` yields `("a/main.tf", Some("main.tf#0"))`
    pub fn split_legacy_key(key: &str) -> (&str, Option<&str>) {
        match (key.find('['), key.ends_with(']')) {
            (Some(open), true) => (&key[..open], Some(&key[open + 1..key.len() - 1])),
            _ => (key, None),
        }
    }
}

impl Display for DefinitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.legacy_key())
    }
}

impl serde::Serialize for DefinitionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Resource,
    Data,
    Provider,
    Module,
    Variable,
    Locals,
    Output,
}

impl BlockType {
    pub fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "resource" => BlockType::Resource,
            "data" => BlockType::Data,
            "provider" => BlockType::Provider,
            "module" => BlockType::Module,
            "variable" => BlockType::Variable,
            "locals" => BlockType::Locals,
            "output" => BlockType::Output,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Resource => "resource",
            BlockType::Data => "data",
            BlockType::Provider => "provider",
            BlockType::Module => "module",
            BlockType::Variable => "variable",
            BlockType::Locals => "locals",
            BlockType::Output => "output",
        }
    }

    pub fn is_checked(&self) -> bool {
        CHECK_BLOCK_TYPES.contains(self)
    }
}

impl Display for BlockType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based, inclusive line range
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_new::new, serde::Serialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

/// A traversal found in a block attribute, e.g. `var.region` inside `provider.region`
#[derive(Clone, Debug, PartialEq, Eq, derive_new::new)]
pub struct Reference {
    /// dotted attribute path inside the block
    pub attribute: String,
    /// traversal segments, e.g. `["aws_vpc", "main", "id"]`
    pub target: Vec<String>,
    /// source text of the whole attribute expression
    pub expression: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModuleCall {
    pub name: String,
    pub source: Option<String>,
    /// one key per instance the call expands to, in instance order
    pub resolved_child_paths: Vec<DefinitionKey>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockKind {
    Resource { type_name: String, name: String },
    Data { type_name: String, name: String },
    Provider { name: String, alias: Option<String> },
    Module(ModuleCall),
    Variable { name: String },
    Local { name: String },
    Output { name: String },
}

/// One declared block instance
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub config: Value,
    pub lines: Option<LineRange>,
    pub references: Vec<Reference>,
    /// canonical address, set by [crate::address::assign_addresses]
    pub address: Option<String>,
}

impl Block {
    pub fn new(kind: BlockKind, config: Value) -> Self {
        Self {
            kind,
            config,
            lines: None,
            references: vec![],
            address: None,
        }
    }

    pub fn with_lines(mut self, start: usize, end: usize) -> Self {
        self.lines = Some(LineRange::new(start, end));
        self
    }

    pub fn with_references(mut self, references: Vec<Reference>) -> Self {
        self.references = references;
        self
    }

    pub fn block_type(&self) -> BlockType {
        match &self.kind {
            BlockKind::Resource { .. } => BlockType::Resource,
            BlockKind::Data { .. } => BlockType::Data,
            BlockKind::Provider { .. } => BlockType::Provider,
            BlockKind::Module(_) => BlockType::Module,
            BlockKind::Variable { .. } => BlockType::Variable,
            BlockKind::Local { .. } => BlockType::Locals,
            BlockKind::Output { .. } => BlockType::Output,
        }
    }

    /// Resource/data type, provider name, empty for everything else
    pub fn type_name(&self) -> &str {
        match &self.kind {
            BlockKind::Resource { type_name, .. } | BlockKind::Data { type_name, .. } => type_name,
            BlockKind::Provider { name, .. } => name,
            _ => "",
        }
    }

    pub fn local_name(&self) -> &str {
        match &self.kind {
            BlockKind::Resource { name, .. }
            | BlockKind::Data { name, .. }
            | BlockKind::Variable { name }
            | BlockKind::Local { name }
            | BlockKind::Output { name } => name,
            BlockKind::Provider { name, alias } => alias.as_deref().unwrap_or(name),
            BlockKind::Module(call) => &call.name,
        }
    }

    /// Path of this block below its block type, e.g. `["aws_s3_bucket", "logs"]`
    pub fn definition_path(&self) -> Vec<String> {
        match &self.kind {
            BlockKind::Resource { type_name, name } | BlockKind::Data { type_name, name } => {
                vec![type_name.clone(), name.clone()]
            }
            BlockKind::Provider { name, alias: Some(alias) } => vec![format!("{name}.{alias}")],
            _ => vec![self.local_name().to_string()],
        }
    }

    /// `aws_s3_bucket.logs`, `network`, `aws`
    pub fn block_name(&self) -> String {
        self.definition_path().join(".")
    }

    /// Address of the block inside its own module, without any module prefix
    pub fn local_address(&self) -> String {
        match &self.kind {
            BlockKind::Resource { type_name, name } => format!("{type_name}.{name}"),
            BlockKind::Data { type_name, name } => format!("data.{type_name}.{name}"),
            BlockKind::Provider { .. } => format!("provider.{}", self.block_name()),
            BlockKind::Module(call) => format!("module.{}", call.name),
            BlockKind::Variable { name } => format!("var.{name}"),
            BlockKind::Local { name } => format!("local.{name}"),
            BlockKind::Output { name } => format!("output.{name}"),
        }
    }

    /// Path inside the file's context tree, e.g. `["resource", "aws_s3_bucket", "logs"]`
    pub fn context_path(&self) -> Vec<String> {
        let mut path = vec![self.block_type().to_string()];
        path.extend(self.definition_path());
        path
    }

    pub fn module_call(&self) -> Option<&ModuleCall> {
        match &self.kind {
            BlockKind::Module(call) => Some(call),
            _ => None,
        }
    }

    pub fn module_call_mut(&mut self) -> Option<&mut ModuleCall> {
        match &mut self.kind {
            BlockKind::Module(call) => Some(call),
            _ => None,
        }
    }

    /// `tags` attribute of the configuration when it is a literal object
    pub fn tags(&self) -> IndexMap<String, Value> {
        self.config
            .get("tags")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }
}

/// All blocks of one loaded file
#[derive(Clone, Debug, Default)]
pub struct FileDefinition {
    /// source lines, shared between all module instances of the same file
    pub lines: Arc<Vec<String>>,
    pub blocks: BTreeMap<BlockType, Vec<Block>>,
}

impl FileDefinition {
    pub fn new(lines: Arc<Vec<String>>) -> Self {
        Self {
            lines,
            blocks: Default::default(),
        }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.entry(block.block_type()).or_default().push(block);
    }

    pub fn blocks_of(&self, block_type: BlockType) -> &[Block] {
        self.blocks.get(&block_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn module_calls(&self) -> impl Iterator<Item = &ModuleCall> {
        self.blocks_of(BlockType::Module)
            .iter()
            .filter_map(Block::module_call)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().flatten()
    }
}

/// Every loaded file, in load order
#[derive(Clone, Debug, Default)]
pub struct Definitions {
    files: IndexMap<DefinitionKey, FileDefinition>,
}

impl Definitions {
    pub fn insert(&mut self, key: DefinitionKey, file: FileDefinition) {
        self.files.insert(key, file);
    }

    pub fn get(&self, key: &DefinitionKey) -> Option<&FileDefinition> {
        self.files.get(key)
    }

    pub fn get_mut(&mut self, key: &DefinitionKey) -> Option<&mut FileDefinition> {
        self.files.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DefinitionKey, &FileDefinition)> {
        self.files.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&DefinitionKey, &mut FileDefinition)> {
        self.files.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a block by file and context path
    pub fn find_block(&self, key: &DefinitionKey, context_path: &[String]) -> Option<&Block> {
        self.get(key)?
            .iter()
            .find(|block| block.context_path() == context_path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nested_key() -> DefinitionKey {
        let root = DefinitionKey::new("main.tf");
        let network = DefinitionKey::with_module(
            "network/main.tf",
            ModuleSource {
                caller: root,
                name: "network".into(),
                instance: Some(InstanceKey::Index(1)),
                ordinal: 1,
            },
        );
        DefinitionKey::with_module(
            "subnet/main.tf",
            ModuleSource {
                caller: network,
                name: "subnet".into(),
                instance: None,
                ordinal: 0,
            },
        )
    }

    #[test]
    fn module_address_is_outermost_first() {
        assert_eq!(
            nested_key().module_address().as_deref(),
            Some("module.network[1].module.subnet")
        );
        assert_eq!(DefinitionKey::new("main.tf").module_address(), None);
    }

    #[test]
    fn legacy_key_nests_callers() {
        assert_eq!(
            nested_key().legacy_key(),
            "subnet/main.tf[network/main.tf[main.tf#1]#0]"
        );
    }

    #[test]
    fn split_legacy_key() {
        assert_eq!(
            DefinitionKey::split_legacy_key("a/main.tf[main.tf#0]"),
            ("a/main.tf", Some("main.tf#0"))
        );
        assert_eq!(DefinitionKey::split_legacy_key("main.tf"), ("main.tf", None));
    }

    #[test]
    fn provider_alias_is_part_of_the_name() {
        let block = Block::new(
            BlockKind::Provider {
                name: "aws".into(),
                alias: Some("east".into()),
            },
            Value::Null,
        );
        assert_eq!(block.context_path(), vec!["provider", "aws.east"]);
        assert_eq!(block.local_address(), "provider.aws.east");
    }
}
