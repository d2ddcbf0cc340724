//! Scan orchestration
//!
//! One [Runner::run] is one scan:
//! 1. load definitions (directory with module expansion, or an explicit file list)
//! 2. assign nested addresses, build the context index
//! 3. push skip directives of module calls down into the module instances
//! 4. build the reference graph and its breadcrumbs (unless disabled)
//! 5. dispatch every checked block to its registry, then run the graph checks
//! 6. merge both reports and drop duplicate results
//!
//! All per-run state (context, referrer cache, graph) is created inside [Runner::run] and
//! dropped with it; nothing is shared between runs.
use crate::address::{assign_addresses, AddressResolver};
use crate::checks::{builtin, CheckOutcome, CheckResult, GraphRegistry, Registries};
use crate::config::{AddressingStrategy, RunConfig};
use crate::context::{ContextEntry, ContextIndex};
use crate::definitions::{Block, BlockType, DefinitionKey, Definitions, LineRange, ModuleSource};
use crate::evaluation::{build_evaluations, reduce_entity_evaluations, EvaluationContext};
use crate::filter::RunnerFilter;
use crate::graph::{Breadcrumbs, ReferenceGraph, Vertex};
use crate::hcl_documents::LoadError;
use crate::loader::{Loaded, Loader};
use crate::report::{merge_reports, ConnectedNode, ExtraResource, Record, Report, CHECK_TYPE};
use crate::secrets::redact;
use crate::skip::{push_skipped_checks_down_from_modules, push_skipped_checks_down_legacy};
use crate::util::{normalize_separators, report_path};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("Root directory was not specified, files were not specified")]
    NothingToScan,
    #[error("Unable to load root directory")]
    Load(#[from] LoadError),
}

pub struct Runner {
    config: RunConfig,
    registries: Registries,
    graph_registry: GraphRegistry,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunConfig::default())
    }
}

impl Runner {
    /// Runner with the built-in checks
    pub fn new(config: RunConfig) -> Self {
        Self::with_registries(config, builtin::registries(), builtin::graph_registry())
    }

    pub fn with_registries(config: RunConfig, registries: Registries, graph_registry: GraphRegistry) -> Self {
        Self {
            config,
            registries,
            graph_registry,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Scan a root directory, or an explicit list of files when no root is given
    pub fn run(&self, root: Option<&Path>, files: &[PathBuf], filter: &RunnerFilter) -> Result<Report, ScanError> {
        let loaded = match root {
            Some(root) => {
                tracing::info!(root=%root.display(), "scanning root folder");
                self.loader(self.config.expand_modules, filter).load_directory(root)?
            }
            None if !files.is_empty() => {
                tracing::info!(files = files.len(), "scanning files");
                self.loader(false, filter).load_files(files)
            }
            None => return Err(ScanError::NothingToScan),
        };

        Ok(self.run_definitions(loaded, filter))
    }

    fn loader(&self, expand_modules: bool, filter: &RunnerFilter) -> Loader {
        Loader::new(expand_modules)
            .excluding(&filter.excluded_paths)
            .with_var_files(&self.config.var_files)
    }

    /// Scan definitions that were loaded already
    #[tracing::instrument(level = "debug", skip_all, fields(files = loaded.definitions.len()))]
    pub fn run_definitions(&self, loaded: Loaded, filter: &RunnerFilter) -> Report {
        let Loaded {
            root,
            mut definitions,
            parsing_errors,
            var_files,
        } = loaded;
        assign_addresses(&mut definitions);

        let mut context = ContextIndex::build(&definitions);
        match self.config.addressing {
            AddressingStrategy::Nested => push_skipped_checks_down_from_modules(&definitions, &mut context),
            AddressingStrategy::Referrer => push_skipped_checks_down_legacy(&definitions, &mut context),
        }

        let graph = self
            .config
            .create_graph
            .then(|| ReferenceGraph::build(&definitions));
        let breadcrumbs = graph
            .as_ref()
            .map(|graph| graph.breadcrumbs(&root, self.config.addressing))
            .unwrap_or_default();
        let evaluations = build_evaluations(&definitions, &root, &var_files);

        let mut scan = Scan {
            root: &root,
            definitions: &definitions,
            context: &context,
            evaluations: &evaluations,
            breadcrumbs: &breadcrumbs,
            filter,
            resolver: AddressResolver::new(self.config.addressing),
        };

        let mut report = Report::new(CHECK_TYPE);
        scan.run_all_blocks(&self.registries, &mut report);
        report.parsing_errors.extend(parsing_errors.into_keys());

        let mut reports = vec![report];
        if let Some(graph) = &graph {
            reports.push(scan.graph_checks_report(graph, &self.graph_registry));
        }

        let mut report = merge_reports(reports);
        report.remove_duplicate_results();
        tracing::info!(summary=?report.summary(), "scan finished");
        report
    }
}

/// Call site of a module instance
struct Caller {
    file_path: String,
    line_range: Option<LineRange>,
}

/// The module a block was loaded through could not be named
struct UnknownModule;

/// State of one run
struct Scan<'a> {
    root: &'a Path,
    definitions: &'a Definitions,
    context: &'a ContextIndex,
    evaluations: &'a IndexMap<DefinitionKey, EvaluationContext>,
    breadcrumbs: &'a Breadcrumbs,
    filter: &'a RunnerFilter,
    resolver: AddressResolver,
}

impl<'a> Scan<'a> {
    fn run_all_blocks(&mut self, registries: &Registries, report: &mut Report) {
        let definitions = self.definitions;
        for (key, file) in definitions.iter() {
            for block in file.iter().filter(|block| block.block_type().is_checked()) {
                self.run_block(registries, key, block, report);
            }
        }
    }

    fn run_block(&mut self, registries: &Registries, key: &DefinitionKey, block: &Block, report: &mut Report) {
        let Some(registry) = registries.for_block_type(block.block_type()) else {
            return;
        };

        let scanned_file = report_path(key.path(), self.root);
        let file_abs_path = key.path().display().to_string();
        let entity_id = self.resolver.resolve(self.definitions, key, block);
        let (entity_type, entity_name, entity_config) = registry.extract_entity_details(block);

        let caller = match self.caller(key, &entity_id) {
            Ok(caller) => caller,
            Err(UnknownModule) => {
                tracing::warn!(resource=%entity_id, file=%key, "failed to get module name for resource");
                return;
            }
        };

        let context_path = block.context_path();
        let entry = self.context.lookup(key, &context_path);
        let (file_line_range, code_lines, skipped_checks) = match entry {
            Some(entry) => (
                line_range(entry),
                entry.code_lines.as_slice(),
                entry.skipped_checks.as_slice(),
            ),
            None => (None, &[][..], &[][..]),
        };

        let evaluations = self
            .evaluations
            .get(key)
            .map(|evaluations| reduce_entity_evaluations(evaluations, &context_path))
            .filter(|evaluations| !evaluations.is_empty());

        if block.block_type() == BlockType::Resource {
            report.resources.insert(format!("{scanned_file}:{entity_id}"));
        }

        let results = registry.scan(&scanned_file, block, skipped_checks, self.filter);
        if results.is_empty() {
            if block.block_type() == BlockType::Resource {
                report.extra_resources.insert(ExtraResource::new(
                    file_abs_path,
                    scanned_file,
                    entity_id,
                ));
            }
            return;
        }

        let entity_key = match self.resolver.strategy() {
            AddressingStrategy::Nested => entity_id.clone(),
            AddressingStrategy::Referrer => format!("{entity_type}.{entity_name}"),
        };
        let breadcrumbs = self
            .breadcrumbs
            .get(&scanned_file)
            .and_then(|entities| entities.get(&entity_key))
            .cloned();
        let attributes_to_omit = self.filter.attributes_to_omit(entity_type);
        let tags = block.tags();

        for (check, check_result) in results {
            let code_block = redact(
                check.is_secret(),
                &check_result,
                code_lines,
                entity_config,
                &attributes_to_omit,
            );

            report.add_record(Record {
                check_id: check.id().to_string(),
                check_name: check.name().to_string(),
                check_result,
                code_block,
                file_path: scanned_file.clone(),
                file_abs_path: file_abs_path.clone(),
                file_line_range,
                resource: entity_id.clone(),
                evaluations: evaluations.clone(),
                entity_tags: tags.clone(),
                caller_file_path: caller.as_ref().map(|caller| caller.file_path.clone()),
                caller_file_line_range: caller.as_ref().and_then(|caller| caller.line_range),
                resource_address: block.address.clone(),
                definition_context_file_path: normalize_separators(&key.legacy_key()),
                breadcrumbs: breadcrumbs.clone(),
                connected_node: None,
                guideline: check.guideline().map(str::to_string),
            });
        }
    }

    /// Call site of the module instance `key` was loaded through
    ///
    /// A missing call site context only drops the line range.
    fn caller(&mut self, key: &DefinitionKey, entity_id: &str) -> Result<Option<Caller>, UnknownModule> {
        let Some(source) = key.source_module.as_deref() else {
            return Ok(None);
        };

        let context_path: Vec<String> = match self.resolver.strategy() {
            AddressingStrategy::Nested => {
                let name = module_name(source, entity_id).ok_or(UnknownModule)?;
                vec![BlockType::Module.to_string(), name.to_string()]
            }
            AddressingStrategy::Referrer => match self.resolver.referrer(self.definitions, key) {
                Some(referrer) => referrer.split('.').map(str::to_string).collect(),
                None => {
                    tracing::debug!(file=%key, "unable to find referrer id");
                    return Ok(None);
                }
            },
        };

        let line_range = match self.context.lookup(&source.caller, &context_path) {
            Some(entry) => line_range(entry),
            None => {
                tracing::debug!(caller=%source.caller, "unable to find caller context");
                None
            }
        };

        Ok(Some(Caller {
            file_path: report_path(source.caller.path(), self.root),
            line_range,
        }))
    }

    fn graph_checks_report(&mut self, graph: &ReferenceGraph, registry: &GraphRegistry) -> Report {
        let mut report = Report::new(CHECK_TYPE);
        let definitions = self.definitions;

        for (check, results) in registry.run_checks(graph, self.filter) {
            for result in results {
                let vertex = graph.vertex(result.entity);
                let Some(entry) = self.context.lookup(&vertex.key, &vertex.context_path) else {
                    continue;
                };

                let mut check_result = CheckResult {
                    result: result.result,
                    suppress_comment: None,
                    evaluated_keys: check.evaluated_keys(),
                };
                // skip directives only ever suppress a failure
                if check_result.result == CheckOutcome::Failed {
                    if let Some(skip) = entry
                        .skipped_checks
                        .iter()
                        .find(|skip| skip.matches(check.id()))
                    {
                        check_result = CheckResult::skipped(skip, check_result.evaluated_keys);
                    }
                }

                let resource = match definitions.find_block(&vertex.key, &vertex.context_path) {
                    Some(block) => self.resolver.resolve(definitions, &vertex.key, block),
                    None => vertex.block_name.clone(),
                };
                let file_path = report_path(vertex.file_path(), self.root);
                let entity_key = match self.resolver.strategy() {
                    AddressingStrategy::Nested => resource.clone(),
                    AddressingStrategy::Referrer => vertex.block_name.clone(),
                };
                let breadcrumbs = self
                    .breadcrumbs
                    .get(&file_path)
                    .and_then(|entities| entities.get(&entity_key))
                    .cloned();

                let code_block = redact(
                    false,
                    &check_result,
                    &entry.code_lines,
                    &vertex.config,
                    &self.filter.attributes_to_omit(&vertex.resource_type),
                );
                let connected_node = result
                    .connected
                    .and_then(|index| self.connected_node(graph.vertex(index)));

                report.add_record(Record {
                    check_id: check.id().to_string(),
                    check_name: check.name().to_string(),
                    check_result,
                    code_block,
                    file_path,
                    file_abs_path: vertex.file_path().display().to_string(),
                    file_line_range: line_range(entry),
                    resource,
                    evaluations: None,
                    entity_tags: vertex.tags.clone(),
                    caller_file_path: None,
                    caller_file_line_range: None,
                    resource_address: Some(vertex.address.clone()),
                    definition_context_file_path: normalize_separators(&vertex.key.legacy_key()),
                    breadcrumbs,
                    connected_node,
                    guideline: check.guideline().map(str::to_string),
                });
            }
        }

        report
    }

    fn connected_node(&self, vertex: &Vertex) -> Option<ConnectedNode> {
        let entry = self.context.lookup(&vertex.key, &vertex.context_path)?;
        Some(ConnectedNode {
            code_block: entry.code_lines.clone(),
            file_path: report_path(vertex.file_path(), self.root),
            file_abs_path: vertex.file_path().display().to_string(),
            file_line_range: line_range(entry),
            resource: vertex.block_name.clone(),
            entity_tags: vertex.tags.clone(),
            resource_address: vertex.address.clone(),
        })
    }
}

fn line_range(entry: &ContextEntry) -> Option<LineRange> {
    Some(LineRange::new(entry.start_line?, entry.end_line?))
}

/// Name of the module call a file was loaded through
///
/// Falls back to the segment after the last `module` in the entity's address.
fn module_name<'s>(source: &'s ModuleSource, entity_id: &'s str) -> Option<&'s str> {
    if !source.name.is_empty() {
        return Some(&source.name);
    }

    let segments: Vec<&str> = entity_id.split('.').collect();
    let position = segments
        .iter()
        .take(segments.len().saturating_sub(1))
        .rposition(|segment| *segment == "module")?;
    let name = segments.get(position + 1)?;
    name.split('[').next().filter(|name| !name.is_empty())
}
