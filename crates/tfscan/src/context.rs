//! Source metadata of every block: line range, code lines and skip directives
//!
//! The index is a tree per loaded file, keyed by block type and then by the block's
//! definition path (`resource → aws_s3_bucket → logs`, `module → network`). It is built
//! once before any check runs; afterwards only [ContextEntry::skipped_checks] changes, and
//! only by appending.
use crate::definitions::{Block, DefinitionKey, Definitions, FileDefinition};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

pub const WILDCARD_CHECK: &str = "*";
const NO_COMMENT: &str = "No comment provided";

/// Inline suppression of one check id, or of all checks with `*`
#[derive(Clone, Debug, PartialEq, Eq, derive_new::new, serde::Serialize)]
pub struct SkipDirective {
    pub id: String,
    pub suppress_comment: String,
}

impl SkipDirective {
    pub fn matches(&self, check_id: &str) -> bool {
        self.id == WILDCARD_CHECK || self.id == check_id
    }
}

/// Parse `#tfscan:skip=ID:comment` (or `checkov:skip=`) directives from code lines
pub fn parse_skip_directives<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<SkipDirective> {
    static SKIP_COMMENT: OnceLock<Regex> = OnceLock::new();
    let regex = SKIP_COMMENT.get_or_init(|| {
        Regex::new(r"(?:tfscan|checkov):skip=\s*([A-Za-z0-9_\-]+|\*)(?::([^\n]+))?")
            .expect("skip comment regex must compile")
    });

    let mut directives = vec![];
    for line in lines {
        let Some(comment_start) = line.find('#').or_else(|| line.find("//")) else {
            continue;
        };
        for captures in regex.captures_iter(&line[comment_start..]) {
            let id = captures[1].to_string();
            let suppress_comment = captures
                .get(2)
                .map(|comment| comment.as_str().trim().to_string())
                .filter(|comment| !comment.is_empty())
                .unwrap_or_else(|| NO_COMMENT.to_string());
            directives.push(SkipDirective::new(id, suppress_comment));
        }
    }
    directives
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ContextEntry {
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    /// `(line number, verbatim line)`
    pub code_lines: Vec<(usize, String)>,
    pub skipped_checks: Vec<SkipDirective>,
    pub definition_path: Vec<String>,
}

impl ContextEntry {
    fn for_block(block: &Block, file: &FileDefinition) -> Self {
        let (start_line, end_line, code_lines) = match block.lines {
            Some(range) => {
                let code_lines: Vec<(usize, String)> = (range.start..=range.end)
                    .filter_map(|number| {
                        file.lines
                            .get(number - 1)
                            .map(|line| (number, format!("{line}\n")))
                    })
                    .collect();
                (Some(range.start), Some(range.end), code_lines)
            }
            None => (None, None, vec![]),
        };

        let skipped_checks =
            parse_skip_directives(code_lines.iter().map(|(_, line)| line.as_str()));

        Self {
            start_line,
            end_line,
            code_lines,
            skipped_checks,
            definition_path: block.definition_path(),
        }
    }

    /// Append directives, keeping the ones already present first
    pub fn append_skips(&mut self, directives: &[SkipDirective]) {
        self.skipped_checks.extend_from_slice(directives);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContextNode {
    Branch(IndexMap<String, ContextNode>),
    Entry(ContextEntry),
}

impl Default for ContextNode {
    fn default() -> Self {
        ContextNode::Branch(Default::default())
    }
}

impl ContextNode {
    fn insert(&mut self, path: &[String], entry: ContextEntry) {
        let ContextNode::Branch(children) = self else {
            tracing::debug!(?path, "context path collides with an entry");
            return;
        };

        match path {
            [] => {}
            [last] => {
                children.insert(last.clone(), ContextNode::Entry(entry));
            }
            [first, rest @ ..] => children
                .entry(first.clone())
                .or_default()
                .insert(rest, entry),
        }
    }

    fn child(&self, key: &str) -> Option<&ContextNode> {
        match self {
            ContextNode::Branch(children) => children.get(key),
            ContextNode::Entry(_) => None,
        }
    }

    fn child_mut(&mut self, key: &str) -> Option<&mut ContextNode> {
        match self {
            ContextNode::Branch(children) => children.get_mut(key),
            ContextNode::Entry(_) => None,
        }
    }
}

/// Per-file context trees
#[derive(Clone, Debug, Default)]
pub struct ContextIndex {
    files: IndexMap<DefinitionKey, ContextNode>,
}

impl ContextIndex {
    pub fn build(definitions: &Definitions) -> Self {
        let mut index = Self::default();
        for (key, file) in definitions.iter() {
            let root = index.files.entry(key.clone()).or_default();
            for block in file.iter() {
                if block.lines.is_none() {
                    tracing::debug!(file=%key, block=%block.block_name(), "block has no source range");
                }
                root.insert(&block.context_path(), ContextEntry::for_block(block, file));
            }
        }
        tracing::debug!(files = index.files.len(), "created definitions context");
        index
    }

    /// Walk the context tree of `key` along `context_path`
    ///
    /// A missing key is logged and yields `None`; callers continue without enrichment.
    pub fn lookup(&self, key: &DefinitionKey, context_path: &[String]) -> Option<&ContextEntry> {
        let Some(mut node) = self.files.get(key) else {
            tracing::warn!(file=%key, "did not find context for file");
            return None;
        };

        for part in context_path {
            match node.child(part) {
                Some(child) => node = child,
                None => {
                    tracing::warn!(file=%key, path=%context_path.join("."), "failed to find context");
                    return None;
                }
            }
        }

        match node {
            ContextNode::Entry(entry) => Some(entry),
            ContextNode::Branch(_) => None,
        }
    }

    pub fn lookup_mut(
        &mut self,
        key: &DefinitionKey,
        context_path: &[String],
    ) -> Option<&mut ContextEntry> {
        let mut node = self.files.get_mut(key)?;
        for part in context_path {
            node = node.child_mut(part)?;
        }

        match node {
            ContextNode::Entry(entry) => Some(entry),
            ContextNode::Branch(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions;
    use crate::definitions::BlockKind;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn parses_skip_directives() {
        let directives = parse_skip_directives([
            "  #tfscan:skip=CKV_AWS_20:public website bucket",
            "  # checkov:skip=CKV_AWS_18",
            "  acl = \"public-read\" // tfscan:skip=*:everything",
            "  name = \"not a tfscan:skip=CKV_1 comment\"",
        ]);

        assert_eq!(
            directives,
            vec![
                SkipDirective::new("CKV_AWS_20".into(), "public website bucket".into()),
                SkipDirective::new("CKV_AWS_18".into(), NO_COMMENT.into()),
                SkipDirective::new("*".into(), "everything".into()),
            ]
        );
    }

    #[test]
    fn wildcard_matches_every_check() {
        assert!(SkipDirective::new("*".into(), String::new()).matches("CKV_AWS_1"));
        assert!(!SkipDirective::new("CKV_AWS_2".into(), String::new()).matches("CKV_AWS_1"));
    }

    #[test]
    fn build_and_lookup() {
        let definitions = definitions! {
            "main.tf" => r#"
resource "aws_s3_bucket" "logs" {
  #tfscan:skip=CKV_AWS_20:logs are public
  acl = "public-read"
}

module "network" {
  source = "./network"
}
"#
        };
        let index = ContextIndex::build(&definitions);
        let key = DefinitionKey::new("main.tf");

        let bucket = index
            .lookup(&key, &path(&["resource", "aws_s3_bucket", "logs"]))
            .unwrap();
        assert_eq!((bucket.start_line, bucket.end_line), (Some(2), Some(5)));
        assert_eq!(bucket.code_lines.len(), 4);
        assert_eq!(bucket.skipped_checks[0].id, "CKV_AWS_20");
        assert_eq!(bucket.definition_path, path(&["aws_s3_bucket", "logs"]));

        let module = index.lookup(&key, &path(&["module", "network"])).unwrap();
        assert_eq!(module.start_line, Some(7));
    }

    #[test]
    fn missing_path_is_none() {
        let definitions = definitions! { "main.tf" => r#"resource "a" "b" {}"# };
        let index = ContextIndex::build(&definitions);
        let key = DefinitionKey::new("main.tf");
        assert_eq!(index.lookup(&key, &path(&["resource", "a", "c"])), None);
        assert_eq!(index.lookup(&DefinitionKey::new("other.tf"), &path(&["resource"])), None);
    }

    #[test]
    fn block_without_source_range_still_gets_an_entry() {
        let mut file = FileDefinition::default();
        file.push(Block::new(
            BlockKind::Resource {
                type_name: "aws_vpc".into(),
                name: "a".into(),
            },
            Value::Null,
        ));
        let mut definitions = Definitions::default();
        definitions.insert(DefinitionKey::new("main.tf"), file);

        let index = ContextIndex::build(&definitions);
        let entry = index
            .lookup(&DefinitionKey::new("main.tf"), &path(&["resource", "aws_vpc", "a"]))
            .unwrap();
        assert_eq!((entry.start_line, entry.end_line), (None, None));
        assert!(entry.code_lines.is_empty());
        assert!(entry.skipped_checks.is_empty());
        assert_eq!(entry.definition_path, path(&["aws_vpc", "a"]));
    }
}
