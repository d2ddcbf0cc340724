//! Variable evaluation traces
//!
//! For each loaded file, every variable referenced by its blocks is described by where its
//! value comes from (`var_file`, `value`) and by every attribute that uses it. Nothing is
//! interpolated: a variable's value is the argument of the module call that instantiated the
//! file. Root module variables take their value from the var files, otherwise their
//! `default`.
use crate::definitions::{BlockKind, BlockType, DefinitionKey, Definitions};
use crate::graph::{scope_of, Scope};
use crate::util::report_path;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One attribute that uses a variable
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct VariableDefinition {
    /// attribute name inside the block, e.g. `bucket` or `versioning.enabled`
    pub definition_name: String,
    pub definition_expression: String,
    /// `/`-joined context path of the block followed by the attribute path
    pub definition_path: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct VariableEvaluation {
    /// report path of the file the value comes from
    pub var_file: String,
    pub value: Value,
    pub definitions: Vec<VariableDefinition>,
}

/// variable name → evaluation
pub type EvaluationContext = IndexMap<String, VariableEvaluation>;

/// A root module variable set in a `.tfvars` file
#[derive(Clone, Debug, PartialEq)]
pub struct VarFileValue {
    pub file: PathBuf,
    pub value: Value,
}

/// variable name → value of the last var file setting it
pub type VarFileValues = IndexMap<String, VarFileValue>;

/// Where a variable of one module instance takes its value from
#[derive(Clone, Debug)]
struct VariableSource {
    var_file: String,
    value: Value,
}

/// Build the evaluation context of every file that references at least one variable
pub fn build_evaluations(
    definitions: &Definitions,
    root: &Path,
    var_files: &VarFileValues,
) -> IndexMap<DefinitionKey, EvaluationContext> {
    let sources = variable_sources(definitions, root, var_files);
    let mut evaluations = IndexMap::new();

    for (key, file) in definitions.iter() {
        let Some(scope) = sources.get(&scope_of(key)) else {
            continue;
        };

        let mut context = EvaluationContext::new();
        for block in file.iter().filter(|block| block.block_type().is_checked()) {
            let block_path = block.context_path().join("/");
            for reference in &block.references {
                let [root_name, name, ..] = reference.target.as_slice() else {
                    continue;
                };
                if root_name != "var" {
                    continue;
                }
                let Some(source) = scope.get(name) else {
                    tracing::trace!(file=%key, variable=%name, "referenced variable is not declared");
                    continue;
                };

                let definition = VariableDefinition {
                    definition_name: reference.attribute.clone(),
                    definition_expression: reference.expression.clone(),
                    definition_path: format!("{block_path}/{}", reference.attribute.replace('.', "/")),
                };
                context
                    .entry(name.clone())
                    .or_insert_with(|| VariableEvaluation {
                        var_file: source.var_file.clone(),
                        value: source.value.clone(),
                        definitions: vec![],
                    })
                    .definitions
                    .push(definition);
            }
        }

        if !context.is_empty() {
            evaluations.insert(key.clone(), context);
        }
    }

    tracing::debug!(files = evaluations.len(), "built variable evaluations");
    evaluations
}

/// Value sources of all variables, grouped by module instance
fn variable_sources(
    definitions: &Definitions,
    root: &Path,
    var_files: &VarFileValues,
) -> HashMap<Scope, HashMap<String, VariableSource>> {
    let mut sources: HashMap<Scope, HashMap<String, VariableSource>> = HashMap::new();

    for (key, file) in definitions.iter() {
        for block in file.blocks_of(BlockType::Variable) {
            let BlockKind::Variable { name } = &block.kind else {
                continue;
            };

            let assigned = match key.source_module.as_deref() {
                Some(source) => {
                    let call = definitions.get(&source.caller).and_then(|caller| {
                        caller
                            .blocks_of(BlockType::Module)
                            .iter()
                            .find(|call| call.local_name() == source.name)
                    });
                    call.and_then(|call| call.config.get(name)).map(|value| VariableSource {
                        var_file: report_path(source.caller.path(), root),
                        value: value.clone(),
                    })
                }
                None => var_files.get(name).map(|assigned| VariableSource {
                    var_file: report_path(&assigned.file, root),
                    value: assigned.value.clone(),
                }),
            };

            let source = assigned.unwrap_or_else(|| VariableSource {
                var_file: report_path(key.path(), root),
                value: block.config.get("default").cloned().unwrap_or_default(),
            });

            sources
                .entry(scope_of(key))
                .or_default()
                .insert(name.clone(), source);
        }
    }

    sources
}

/// Keep the variables used by one entity, with only the definitions inside it
pub fn reduce_entity_evaluations(
    evaluations: &EvaluationContext,
    entity_context_path: &[String],
) -> EvaluationContext {
    let prefix = format!("{}/", entity_context_path.join("/"));

    evaluations
        .iter()
        .filter_map(|(name, evaluation)| {
            let definitions: Vec<VariableDefinition> = evaluation
                .definitions
                .iter()
                .filter(|definition| definition.definition_path.starts_with(&prefix))
                .cloned()
                .collect();
            if definitions.is_empty() {
                return None;
            }

            Some((
                name.clone(),
                VariableEvaluation {
                    definitions,
                    ..evaluation.clone()
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions;
    use pretty_assertions::assert_eq;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn defaults_and_definitions() {
        let definitions = definitions! {
            "main.tf" => r#"
variable "env" {
  default = "prod"
}

resource "aws_s3_bucket" "logs" {
  bucket = "logs-${var.env}"
}

resource "aws_s3_bucket" "assets" {
  bucket = "assets"
  tags = {
    env = var.env
  }
}
"#
        };
        let evaluations = build_evaluations(&definitions, Path::new(""), &VarFileValues::new());
        let context = &evaluations[&DefinitionKey::new("main.tf")];
        let env = &context["env"];

        assert_eq!(env.var_file, "/main.tf");
        assert_eq!(env.value, Value::from("prod"));
        let paths: Vec<&str> = env
            .definitions
            .iter()
            .map(|definition| definition.definition_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["resource/aws_s3_bucket/logs/bucket", "resource/aws_s3_bucket/assets/tags"]
        );
    }

    #[test]
    fn var_files_override_defaults_of_root_variables() {
        let definitions = definitions! {
            "main.tf" => r#"
variable "env" {
  default = "dev"
}

resource "aws_s3_bucket" "logs" {
  bucket = var.env
}
"#
        };
        let var_files = VarFileValues::from([(
            "env".to_string(),
            VarFileValue {
                file: PathBuf::from("prod.tfvars"),
                value: "prod".into(),
            },
        )]);
        let evaluations = build_evaluations(&definitions, Path::new(""), &var_files);
        let env = &evaluations[&DefinitionKey::new("main.tf")]["env"];

        assert_eq!(env.var_file, "/prod.tfvars");
        assert_eq!(env.value, Value::from("prod"));
    }

    #[test]
    fn reduce_keeps_entity_definitions() {
        let evaluations = EvaluationContext::from([
            (
                "env".to_string(),
                VariableEvaluation {
                    var_file: "/main.tf".into(),
                    value: "prod".into(),
                    definitions: vec![
                        VariableDefinition {
                            definition_name: "bucket".into(),
                            definition_expression: "\"logs-${var.env}\"".into(),
                            definition_path: "resource/aws_s3_bucket/logs/bucket".into(),
                        },
                        VariableDefinition {
                            definition_name: "bucket".into(),
                            definition_expression: "var.env".into(),
                            definition_path: "resource/aws_s3_bucket/logs2/bucket".into(),
                        },
                    ],
                },
            ),
            (
                "region".to_string(),
                VariableEvaluation {
                    var_file: "/main.tf".into(),
                    value: Value::Null,
                    definitions: vec![VariableDefinition {
                        definition_name: "region".into(),
                        definition_expression: "var.region".into(),
                        definition_path: "provider/aws/region".into(),
                    }],
                },
            ),
        ]);

        let reduced =
            reduce_entity_evaluations(&evaluations, &path(&["resource", "aws_s3_bucket", "logs"]));
        assert_eq!(reduced.keys().collect::<Vec<_>>(), vec!["env"]);
        assert_eq!(reduced["env"].definitions.len(), 1);
    }
}
