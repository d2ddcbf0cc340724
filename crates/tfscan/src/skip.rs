//! Push skip directives of module calls down to everything the call instantiates
//!
//! A `#tfscan:skip=ID` on a `module` block suppresses `ID` on every block loaded through
//! that call, modules called by the module included. Directives are only ever appended to
//! [ContextEntry](crate::context::ContextEntry)s, never replaced.
//!
//! Two entry points converge on the same result:
//! - [push_skipped_checks_down_from_modules] follows `resolved_child_paths` recursively
//! - [push_skipped_checks_down_legacy] matches child files by their legacy string keys
//!
//! Only the directives written on a module block itself are pushed. Directives it inherited
//! from an outer call reach the same children through the outer call already.
use crate::context::{ContextIndex, SkipDirective};
use crate::definitions::{BlockType, DefinitionKey, Definitions};
use std::collections::HashSet;

/// A module call together with the directives written on it
struct ModuleSkips {
    caller: DefinitionKey,
    name: String,
    child_paths: Vec<DefinitionKey>,
    skips: Vec<SkipDirective>,
}

fn module_skips(definitions: &Definitions, context: &ContextIndex) -> Vec<ModuleSkips> {
    let mut modules = vec![];
    for (key, file) in definitions.iter() {
        for call in file.module_calls() {
            let path = vec![BlockType::Module.to_string(), call.name.clone()];
            let skips = context
                .lookup(key, &path)
                .map(|entry| entry.skipped_checks.clone())
                .unwrap_or_default();
            if skips.is_empty() {
                continue;
            }

            modules.push(ModuleSkips {
                caller: key.clone(),
                name: call.name.clone(),
                child_paths: call.resolved_child_paths.clone(),
                skips,
            });
        }
    }
    modules
}

/// Propagate the directives of every module call through its resolved child paths
pub fn push_skipped_checks_down_from_modules(definitions: &Definitions, context: &mut ContextIndex) {
    for module in module_skips(definitions, context) {
        tracing::debug!(
            module=%module.name,
            caller=%module.caller,
            skips=module.skips.len(),
            "pushing skipped checks down"
        );
        propagate(definitions, context, &module.skips, &module.child_paths);
    }
}

/// Append `skips` to every checked block in `child_paths`, recursing into nested module calls
///
/// Each file key is visited at most once per call, so cyclic module graphs terminate.
#[tracing::instrument(level = "trace", skip_all)]
pub fn propagate(
    definitions: &Definitions,
    context: &mut ContextIndex,
    skips: &[SkipDirective],
    child_paths: &[DefinitionKey],
) {
    let mut visited = HashSet::new();
    propagate_into(definitions, context, skips, child_paths, &mut visited);
}

fn propagate_into(
    definitions: &Definitions,
    context: &mut ContextIndex,
    skips: &[SkipDirective],
    child_paths: &[DefinitionKey],
    visited: &mut HashSet<DefinitionKey>,
) {
    if skips.is_empty() {
        return;
    }

    for child in child_paths {
        if !visited.insert(child.clone()) {
            tracing::debug!(file=%child, "already visited, not propagating again");
            continue;
        }

        let Some(file) = definitions.get(child) else {
            tracing::debug!(file=%child, "resolved path has no definition");
            continue;
        };

        for block in file.iter().filter(|block| block.block_type().is_checked()) {
            match context.lookup_mut(child, &block.context_path()) {
                Some(entry) => entry.append_skips(skips),
                None => tracing::debug!(file=%child, block=%block.block_name(), "no context to append skips to"),
            }

            if let Some(call) = block.module_call() {
                propagate_into(definitions, context, skips, &call.resolved_child_paths, visited);
            }
        }
    }
}

/// Propagate module directives by matching legacy file keys
///
/// A file receives the directives of a module call when the call's `caller#ordinal` token
/// appears anywhere in the referrer part of the file's legacy key.
pub fn push_skipped_checks_down_legacy(definitions: &Definitions, context: &mut ContextIndex) {
    for module in module_skips(definitions, context) {
        let caller = module.caller.legacy_key();
        let tokens: HashSet<String> = module
            .child_paths
            .iter()
            .filter_map(|child| child.source_module.as_ref())
            .map(|source| format!("{caller}#{}", source.ordinal))
            .collect();

        push_skipped_checks_down_old(definitions, context, &tokens, &module.skips);
    }
}

fn push_skipped_checks_down_old(
    definitions: &Definitions,
    context: &mut ContextIndex,
    referrer_tokens: &HashSet<String>,
    skips: &[SkipDirective],
) {
    if referrer_tokens.is_empty() || skips.is_empty() {
        return;
    }

    for (key, file) in definitions.iter() {
        let legacy = key.legacy_key();
        let (_, Some(referrer)) = DefinitionKey::split_legacy_key(&legacy) else {
            continue;
        };

        if !referrer_tokens
            .iter()
            .any(|token| referrer_contains(referrer, token))
        {
            continue;
        }

        for block in file.iter().filter(|block| block.block_type().is_checked()) {
            if let Some(entry) = context.lookup_mut(key, &block.context_path()) {
                entry.append_skips(skips);
            }
        }
    }
}

/// `token` occurs in `referrer` delimited by the legacy key's brackets
fn referrer_contains(referrer: &str, token: &str) -> bool {
    referrer.match_indices(token).any(|(start, _)| {
        let end = start + token.len();
        let starts_clean = start == 0 || referrer[..start].ends_with('[');
        let ends_clean = end == referrer.len() || referrer[end..].starts_with(']');
        starts_clean && ends_clean
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::{Block, BlockKind, FileDefinition, ModuleCall, ModuleSource};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn resource(name: &str) -> Block {
        Block::new(
            BlockKind::Resource {
                type_name: "aws_subnet".into(),
                name: name.into(),
            },
            Value::Null,
        )
        .with_lines(1, 1)
    }

    fn module(name: &str, children: Vec<DefinitionKey>) -> Block {
        Block::new(
            BlockKind::Module(ModuleCall {
                name: name.into(),
                source: None,
                resolved_child_paths: children,
            }),
            Value::Null,
        )
        .with_lines(1, 1)
    }

    fn child(path: &str, caller: &DefinitionKey, name: &str, ordinal: usize) -> DefinitionKey {
        DefinitionKey::with_module(
            path,
            ModuleSource {
                caller: caller.clone(),
                name: name.into(),
                instance: None,
                ordinal,
            },
        )
    }

    fn file(lines: &[&str], blocks: Vec<Block>) -> FileDefinition {
        let mut file = FileDefinition::new(std::sync::Arc::new(
            lines.iter().map(|line| line.to_string()).collect(),
        ));
        for block in blocks {
            file.push(block);
        }
        file
    }

    /// main.tf → module network → module subnet → aws_subnet.public
    fn three_levels() -> (Definitions, DefinitionKey, DefinitionKey) {
        let root = DefinitionKey::new("main.tf");
        let network = child("network/main.tf", &root, "network", 0);
        let subnet = child("subnet/main.tf", &network, "subnet", 0);

        let mut definitions = Definitions::default();
        definitions.insert(
            root,
            file(
                &["module \"network\" { #tfscan:skip=CKV_X_1:reviewed"],
                vec![module("network", vec![network.clone()])],
            ),
        );
        definitions.insert(
            network.clone(),
            file(&["module \"subnet\" {"], vec![module("subnet", vec![subnet.clone()])]),
        );
        definitions.insert(
            subnet.clone(),
            file(&["resource \"aws_subnet\" \"public\" {"], vec![resource("public")]),
        );
        (definitions, network, subnet)
    }

    fn skip_ids(context: &ContextIndex, key: &DefinitionKey, path: &[&str]) -> Vec<String> {
        let path: Vec<String> = path.iter().map(|part| part.to_string()).collect();
        context
            .lookup(key, &path)
            .unwrap()
            .skipped_checks
            .iter()
            .map(|skip| skip.id.clone())
            .collect()
    }

    #[test]
    fn nested_propagation_reaches_every_level() {
        let (definitions, network, subnet) = three_levels();
        let mut context = ContextIndex::build(&definitions);
        push_skipped_checks_down_from_modules(&definitions, &mut context);

        assert_eq!(skip_ids(&context, &network, &["module", "subnet"]), vec!["CKV_X_1"]);
        assert_eq!(
            skip_ids(&context, &subnet, &["resource", "aws_subnet", "public"]),
            vec!["CKV_X_1"]
        );
    }

    #[test]
    fn legacy_propagation_converges_with_nested() {
        let (definitions, network, subnet) = three_levels();
        let mut nested = ContextIndex::build(&definitions);
        push_skipped_checks_down_from_modules(&definitions, &mut nested);
        let mut legacy = ContextIndex::build(&definitions);
        push_skipped_checks_down_legacy(&definitions, &mut legacy);

        for (key, path) in [
            (&network, vec!["module", "subnet"]),
            (&subnet, vec!["resource", "aws_subnet", "public"]),
        ] {
            assert_eq!(skip_ids(&legacy, key, &path), skip_ids(&nested, key, &path));
        }
    }

    #[test]
    fn propagation_appends_after_own_directives() {
        let (mut definitions, _, subnet) = three_levels();
        *definitions.get_mut(&subnet).unwrap() = file(
            &["resource \"aws_subnet\" \"public\" { #tfscan:skip=CKV_OWN"],
            vec![resource("public")],
        );
        let mut context = ContextIndex::build(&definitions);
        push_skipped_checks_down_from_modules(&definitions, &mut context);

        assert_eq!(
            skip_ids(&context, &subnet, &["resource", "aws_subnet", "public"]),
            vec!["CKV_OWN", "CKV_X_1"]
        );
    }

    #[test]
    fn cyclic_module_graph_terminates() {
        let root = DefinitionKey::new("main.tf");
        let a = child("a/main.tf", &root, "a", 0);

        let mut definitions = Definitions::default();
        definitions.insert(
            root,
            file(&["module \"a\" { #tfscan:skip=*"], vec![module("a", vec![a.clone()])]),
        );
        // module a calls itself
        definitions.insert(
            a.clone(),
            file(
                &["module \"again\" {"],
                vec![module("again", vec![a.clone()]), resource("public")],
            ),
        );

        let mut context = ContextIndex::build(&definitions);
        push_skipped_checks_down_from_modules(&definitions, &mut context);
        assert_eq!(skip_ids(&context, &a, &["resource", "aws_subnet", "public"]), vec!["*"]);
    }

    #[test]
    fn referrer_tokens_respect_brackets() {
        assert!(referrer_contains("main.tf#0", "main.tf#0"));
        assert!(referrer_contains("net/main.tf[main.tf#0]#1", "main.tf#0"));
        assert!(!referrer_contains("main.tf#10", "main.tf#1"));
        assert!(!referrer_contains("/x/amain.tf#0", "main.tf#0"));
    }
}
