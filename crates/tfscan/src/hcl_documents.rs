//! parsed hcl documents ([Body] plus the source lines it came from)
//!
//! [HclDocument] is the bridge between `hcl_edit` and the typed [definitions](crate::definitions)
//! model. Spans of the parsed structures are turned into 1-based line ranges so the context
//! index can point back at the original source, and every attribute expression is walked for
//! traversals to record the references a block makes.
use crate::definitions::{Block, BlockKind, FileDefinition, Reference};
use crate::util::TraversalExt;
use crate::value::{expression_source, Value};
use crate::visit::VisitTraversals;
use hcl_edit::structure::{Body, Structure};
use hcl_edit::Span;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct HclDocument {
    pub path: PathBuf,
    pub lines: Arc<Vec<String>>,
    line_starts: Vec<usize>,
    body: Body,
}

impl HclDocument {
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self, LoadError> {
        let body = hcl_edit::parser::parse_body(text)?;

        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(offset, _)| offset + 1));

        Ok(Self {
            path: path.into(),
            lines: Arc::new(text.lines().map(str::to_string).collect()),
            line_starts,
            body,
        })
    }

    pub fn load(file_path: &Path) -> Result<Self, LoadError> {
        tracing::info!(path=%file_path.display(), "loading file");
        let text = std::fs::read_to_string(file_path)?;
        Self::parse(file_path, &text)
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|start| *start <= offset)
    }

    fn line_range(&self, span: Option<std::ops::Range<usize>>) -> Option<(usize, usize)> {
        let span = span?;
        let start = self.line_of(span.start);
        let end = self.line_of(span.end.saturating_sub(1).max(span.start));
        Some((start, end))
    }

    /// Convert the document into typed blocks
    ///
    /// Blocks that are not part of the block model (`terraform`, `moved`, ...) and blocks with
    /// the wrong number of labels are left out.
    pub fn to_definition(&self) -> FileDefinition {
        let mut definition = FileDefinition::new(self.lines.clone());

        for structure in self.body.iter() {
            let Structure::Block(block) = structure else {
                tracing::debug!(path=%self.path.display(), "ignoring root attribute");
                continue;
            };

            let ident = block.ident.value().as_str();
            let labels: Vec<&str> = block.labels.iter().map(|label| label.as_str()).collect();
            let lines = self.line_range(block.span());

            if ident == "locals" {
                for attribute in block.body.attributes() {
                    let name = attribute.key.value().as_str().to_string();
                    let expr: hcl::Expression = attribute.value.clone().into();
                    let references = references_in_expression(&name, &expr);
                    let config = Value::Object([(name.clone(), expr.into())].into_iter().collect());

                    let mut local = Block::new(BlockKind::Local { name }, config)
                        .with_references(references);
                    if let Some((start, end)) = self.line_range(attribute.span()) {
                        local = local.with_lines(start, end);
                    }
                    definition.push(local);
                }
                continue;
            }

            let body: hcl::Body = block.body.clone().into();
            let references = references_in_body(&body);
            let config: Value = body.into();

            let kind = match (ident, labels.as_slice()) {
                ("resource", [type_name, name]) => BlockKind::Resource {
                    type_name: type_name.to_string(),
                    name: name.to_string(),
                },
                ("data", [type_name, name]) => BlockKind::Data {
                    type_name: type_name.to_string(),
                    name: name.to_string(),
                },
                ("provider", [name]) => BlockKind::Provider {
                    name: name.to_string(),
                    alias: config
                        .get("alias")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
                ("module", [name]) => BlockKind::Module(crate::definitions::ModuleCall {
                    name: name.to_string(),
                    source: config
                        .get("source")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    resolved_child_paths: vec![],
                }),
                ("variable", [name]) => BlockKind::Variable {
                    name: name.to_string(),
                },
                ("output", [name]) => BlockKind::Output {
                    name: name.to_string(),
                },
                ("resource" | "data" | "provider" | "module" | "variable" | "output", _) => {
                    tracing::warn!(
                        path=%self.path.display(),
                        block=ident,
                        ?labels,
                        "unexpected number of block labels"
                    );
                    continue;
                }
                _ => {
                    tracing::trace!(path=%self.path.display(), block=ident, "block type not modelled");
                    continue;
                }
            };

            let mut block = Block::new(kind, config).with_references(references);
            if let Some((start, end)) = lines {
                block = block.with_lines(start, end);
            }
            definition.push(block);
        }

        definition
    }
}

/// Collect the references of every attribute in a body, nested blocks included
fn references_in_body(body: &hcl::Body) -> Vec<Reference> {
    let mut references = vec![];
    collect_body_references(body, "", &mut references);
    references
}

fn collect_body_references(body: &hcl::Body, prefix: &str, references: &mut Vec<Reference>) {
    for structure in body.iter() {
        match structure {
            hcl::Structure::Attribute(attribute) => {
                let attribute_path = format!("{prefix}{}", attribute.key);
                references.extend(references_in_expression(&attribute_path, &attribute.expr));
            }
            hcl::Structure::Block(block) => {
                let nested_prefix = format!("{prefix}{}.", block.identifier);
                collect_body_references(&block.body, &nested_prefix, references);
            }
        }
    }
}

fn references_in_expression(attribute: &str, expr: &hcl::Expression) -> Vec<Reference> {
    let mut targets: Vec<Vec<String>> = vec![];
    let mut collect = |traversal: &hcl::Traversal| {
        let path = traversal.segments();
        if !path.is_empty() && !targets.contains(&path) {
            targets.push(path);
        }
    };
    expr.visit_traversals(&mut collect);

    let source = expression_source(expr);
    targets
        .into_iter()
        .map(|target| Reference::new(attribute.to_string(), target, source.clone()))
        .collect()
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
}

/// Utility macro to create [Definitions](crate::definitions::Definitions) from inline sources
///
/// ```
/// # use tfscan::definitions;
/// let definitions = definitions! {
///   "main.tf" => r#"resource "aws_s3_bucket" "logs" {}"#,
///   "vars.tf" => r#"variable "region" {}"#
/// };
/// assert_eq!(definitions.len(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use tfscan::definitions;
/// definitions! { "main.tf" => "not = valid = hcl" };
/// ```
#[macro_export]
macro_rules! definitions {
    { $($source:expr => $text:expr),+ $(,)? } => {{
        let mut definitions = $crate::definitions::Definitions::default();
        $(
            let document = $crate::hcl_documents::HclDocument::parse($source, $text)
                .expect("document must parse");
            definitions.insert(
                $crate::definitions::DefinitionKey::new($source),
                document.to_definition(),
            );
        )+

        definitions
    }};
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::definitions::{BlockType, LineRange};
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"provider "aws" {
  region = var.region
}

resource "aws_s3_bucket" "logs" {
  bucket = "${local.prefix}-logs"
  acl    = "private"
  logging {
    target_bucket = aws_s3_bucket.audit.id
  }
}

locals {
  prefix = "acme"
}

terraform {
  required_version = ">= 1.0"
}
"#;

    fn document() -> FileDefinition {
        HclDocument::parse("main.tf", SOURCE).unwrap().to_definition()
    }

    #[test]
    fn blocks_carry_line_ranges() {
        let definition = document();
        let bucket = &definition.blocks_of(BlockType::Resource)[0];
        assert_eq!(bucket.lines, Some(LineRange::new(5, 11)));
        assert_eq!(bucket.block_name(), "aws_s3_bucket.logs");

        let provider = &definition.blocks_of(BlockType::Provider)[0];
        assert_eq!(provider.lines, Some(LineRange::new(1, 3)));
    }

    #[test]
    fn unmodelled_blocks_are_ignored() {
        let definition = document();
        assert_eq!(definition.iter().count(), 3);
    }

    #[test]
    fn locals_are_split_per_attribute() {
        let definition = document();
        let local = &definition.blocks_of(BlockType::Locals)[0];
        assert_eq!(local.local_name(), "prefix");
        assert_eq!(local.lines, Some(LineRange::new(14, 14)));
    }

    #[test]
    fn references_include_nested_blocks_and_templates() {
        let definition = document();
        let bucket = &definition.blocks_of(BlockType::Resource)[0];
        let targets: Vec<(&str, Vec<String>)> = bucket
            .references
            .iter()
            .map(|reference| (reference.attribute.as_str(), reference.target.clone()))
            .collect();

        assert_eq!(
            targets,
            vec![
                ("bucket", vec!["local".to_string(), "prefix".to_string()]),
                (
                    "logging.target_bucket",
                    vec!["aws_s3_bucket".to_string(), "audit".to_string(), "id".to_string()]
                ),
            ]
        );
    }
}
