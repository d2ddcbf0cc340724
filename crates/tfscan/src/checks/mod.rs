//! Check registries
//!
//! Per-block checks implement [Check] and are grouped into one [Registry] per checked block
//! type; [Registries] picks the registry for a block. Relational checks implement
//! [GraphCheck], run over the whole [ReferenceGraph] and live in a [GraphRegistry].
//!
//! Skip directives are applied by the registries: a skipped check still yields a result,
//! marked [CheckOutcome::Skipped], so suppressions stay visible in reports.
pub mod builtin;

use crate::context::SkipDirective;
use crate::definitions::{Block, BlockType};
use crate::filter::RunnerFilter;
use crate::graph::ReferenceGraph;
use crate::value::Value;
use petgraph::graph::NodeIndex;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckOutcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CheckResult {
    pub result: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evaluated_keys: Vec<String>,
}

impl CheckResult {
    pub fn skipped(directive: &SkipDirective, evaluated_keys: Vec<String>) -> Self {
        Self {
            result: CheckOutcome::Skipped,
            suppress_comment: Some(directive.suppress_comment.clone()),
            evaluated_keys,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CheckError {
    #[error("attribute {0} has an unexpected shape")]
    UnexpectedShape(String),
    #[error("{0}")]
    Other(String),
}

/// What a check gets to see of a block
#[derive(Clone, Copy, Debug)]
pub struct Entity<'a> {
    pub block_type: BlockType,
    /// resource/data type, provider name, `module` for module calls
    pub entity_type: &'a str,
    pub name: &'a str,
    pub config: &'a Value,
}

/// A check over a single block
pub trait Check: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// entity types this check applies to, `*` for all
    fn supported_entities(&self) -> &[&str];
    fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError>;

    /// configuration keys the check looks at
    fn evaluated_keys(&self) -> Vec<String> {
        vec![]
    }

    /// the check inspects secret values; its evaluated keys are redacted on failure
    fn is_secret(&self) -> bool {
        false
    }

    fn guideline(&self) -> Option<&str> {
        None
    }
}

/// Checks for one block type
pub struct Registry {
    block_type: BlockType,
    checks: Vec<Arc<dyn Check>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("block_type", &self.block_type)
            .field(
                "checks",
                &self.checks.iter().map(|check| check.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    pub fn new(block_type: BlockType) -> Self {
        Self {
            block_type,
            checks: vec![],
        }
    }

    pub fn register(&mut self, check: impl Check + 'static) {
        self.checks.push(Arc::new(check));
    }

    pub fn checks_for<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a Arc<dyn Check>> {
        self.checks.iter().filter(move |check| {
            check
                .supported_entities()
                .iter()
                .any(|supported| *supported == "*" || *supported == entity_type)
        })
    }

    /// `(entity type, name, configuration)` of a block
    pub fn extract_entity_details<'b>(&self, block: &'b Block) -> (&'b str, &'b str, &'b Value) {
        let entity_type = match self.block_type {
            BlockType::Module => "module",
            _ => block.type_name(),
        };
        (entity_type, block.local_name(), &block.config)
    }

    /// Run every applicable check against a block
    ///
    /// Checks excluded by the filter are left out. Checks matched by a skip directive are
    /// reported as skipped, the first matching directive wins. A check that errors is logged
    /// and left out; the remaining checks still run.
    pub fn scan(
        &self,
        scanned_file: &str,
        block: &Block,
        skipped_checks: &[SkipDirective],
        filter: &RunnerFilter,
    ) -> Vec<(Arc<dyn Check>, CheckResult)> {
        let (entity_type, name, config) = self.extract_entity_details(block);
        let entity = Entity {
            block_type: self.block_type,
            entity_type,
            name,
            config,
        };

        let mut results = vec![];
        for check in self.checks_for(entity_type) {
            if !filter.should_run_check(check.id()) {
                continue;
            }

            if let Some(directive) = skipped_checks.iter().find(|skip| skip.matches(check.id())) {
                tracing::debug!(check=%check.id(), file=%scanned_file, entity=%name, "check skipped");
                results.push((check.clone(), CheckResult::skipped(directive, check.evaluated_keys())));
                continue;
            }

            match check.scan_entity(&entity) {
                Ok(result) => {
                    tracing::trace!(check=%check.id(), entity=%name, ?result, "check evaluated");
                    results.push((
                        check.clone(),
                        CheckResult {
                            result,
                            suppress_comment: None,
                            evaluated_keys: check.evaluated_keys(),
                        },
                    ));
                }
                Err(err) => {
                    tracing::warn!(check=%check.id(), file=%scanned_file, entity=%name, %err, "check failed to run");
                }
            }
        }
        results
    }
}

/// One registry per checked block type
#[derive(Debug)]
pub struct Registries {
    pub resource: Registry,
    pub data: Registry,
    pub provider: Registry,
    pub module: Registry,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            resource: Registry::new(BlockType::Resource),
            data: Registry::new(BlockType::Data),
            provider: Registry::new(BlockType::Provider),
            module: Registry::new(BlockType::Module),
        }
    }
}

impl Registries {
    pub fn for_block_type(&self, block_type: BlockType) -> Option<&Registry> {
        match block_type {
            BlockType::Resource => Some(&self.resource),
            BlockType::Data => Some(&self.data),
            BlockType::Provider => Some(&self.provider),
            BlockType::Module => Some(&self.module),
            _ => None,
        }
    }
}

/// Result of a relational check for one vertex
#[derive(Clone, Debug, PartialEq)]
pub struct GraphCheckResult {
    pub entity: NodeIndex,
    pub result: CheckOutcome,
    /// a second vertex the result is about, e.g. the rule attached to a security group
    pub connected: Option<NodeIndex>,
}

/// A check over the whole reference graph
pub trait GraphCheck: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn run(&self, graph: &ReferenceGraph) -> Vec<GraphCheckResult>;

    fn evaluated_keys(&self) -> Vec<String> {
        vec![]
    }

    fn guideline(&self) -> Option<&str> {
        None
    }
}

#[derive(Default)]
pub struct GraphRegistry {
    checks: Vec<Arc<dyn GraphCheck>>,
}

impl GraphRegistry {
    pub fn register(&mut self, check: impl GraphCheck + 'static) {
        self.checks.push(Arc::new(check));
    }

    pub fn run_checks(
        &self,
        graph: &ReferenceGraph,
        filter: &RunnerFilter,
    ) -> Vec<(Arc<dyn GraphCheck>, Vec<GraphCheckResult>)> {
        self.checks
            .iter()
            .filter(|check| filter.should_run_check(check.id()))
            .map(|check| (check.clone(), check.run(graph)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::BlockKind;
    use crate::object;
    use pretty_assertions::assert_eq;

    struct AclCheck;

    impl Check for AclCheck {
        fn id(&self) -> &str {
            "CKV_TEST_1"
        }
        fn name(&self) -> &str {
            "acl must be private"
        }
        fn supported_entities(&self) -> &[&str] {
            &["aws_s3_bucket"]
        }
        fn scan_entity(&self, entity: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
            match entity.config.get("acl").and_then(Value::as_str) {
                Some("private") => Ok(CheckOutcome::Passed),
                Some(_) => Ok(CheckOutcome::Failed),
                None => Err(CheckError::UnexpectedShape("acl".into())),
            }
        }
    }

    struct Broken;

    impl Check for Broken {
        fn id(&self) -> &str {
            "CKV_TEST_2"
        }
        fn name(&self) -> &str {
            "always errors"
        }
        fn supported_entities(&self) -> &[&str] {
            &["*"]
        }
        fn scan_entity(&self, _: &Entity<'_>) -> Result<CheckOutcome, CheckError> {
            Err(CheckError::Other("boom".into()))
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new(BlockType::Resource);
        registry.register(Broken);
        registry.register(AclCheck);
        registry
    }

    fn bucket(acl: &str) -> Block {
        Block::new(
            BlockKind::Resource {
                type_name: "aws_s3_bucket".into(),
                name: "logs".into(),
            },
            object! { "acl" => acl },
        )
    }

    fn outcomes(results: &[(Arc<dyn Check>, CheckResult)]) -> Vec<(&str, CheckOutcome)> {
        results
            .iter()
            .map(|(check, result)| (check.id(), result.result))
            .collect()
    }

    #[test]
    fn erroring_checks_do_not_stop_the_scan() {
        let results = registry().scan("/main.tf", &bucket("public-read"), &[], &Default::default());
        assert_eq!(outcomes(&results), vec![("CKV_TEST_1", CheckOutcome::Failed)]);
    }

    #[test]
    fn skip_directive_marks_failing_check_skipped() {
        let skips = vec![
            SkipDirective::new("CKV_TEST_1".into(), "first".into()),
            SkipDirective::new("*".into(), "second".into()),
        ];
        let results = registry().scan("/main.tf", &bucket("public-read"), &skips, &Default::default());

        assert_eq!(
            outcomes(&results),
            vec![
                ("CKV_TEST_2", CheckOutcome::Skipped),
                ("CKV_TEST_1", CheckOutcome::Skipped)
            ]
        );
        assert_eq!(results[1].1.suppress_comment.as_deref(), Some("first"));
        assert_eq!(results[0].1.suppress_comment.as_deref(), Some("second"));
    }

    #[test]
    fn filtered_checks_are_left_out() {
        let filter = RunnerFilter {
            skip_checks: ["CKV_TEST_1".to_string()].into(),
            ..Default::default()
        };
        let results = registry().scan("/main.tf", &bucket("private"), &[], &filter);
        assert!(results.is_empty());
    }

    #[test]
    fn module_entity_type() {
        let registry = Registry::new(BlockType::Module);
        let block = Block::new(
            BlockKind::Module(crate::definitions::ModuleCall {
                name: "network".into(),
                source: None,
                resolved_child_paths: vec![],
            }),
            Value::Null,
        );
        let (entity_type, name, _) = registry.extract_entity_details(&block);
        assert_eq!((entity_type, name), ("module", "network"));
    }
}
