//! Load configuration files into [Definitions]
//!
//! A directory scan loads every `.tf`/`.hcl` file of the root directory and then follows
//! local module calls (`source = "./..."`), loading the module's files once per call
//! instance. Each instance gets its own [DefinitionKey] so that the same module called twice
//! yields two independent sets of blocks.
//!
//! Files and module directories matching an excluded path are skipped. Files that fail to
//! parse never abort loading; they are collected as parsing errors, var files included.
use crate::definitions::{DefinitionKey, Definitions, FileDefinition, InstanceKey, ModuleSource};
use crate::evaluation::{VarFileValue, VarFileValues};
use crate::filter::is_excluded;
use crate::hcl_documents::{HclDocument, LoadError};
use crate::util::normalize_path;
use crate::value::Value;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FILE_EXTENSIONS: [&str; 2] = ["tf", "hcl"];
const LOCK_FILE: &str = ".terraform.lock.hcl";
/// A literal `count` above this is expanded once, like an unresolved one
const MAX_MODULE_INSTANCES: i64 = 1000;

/// Result of loading: definitions plus the files that could not be parsed
#[derive(Debug, Default)]
pub struct Loaded {
    pub root: PathBuf,
    pub definitions: Definitions,
    /// file path → error message
    pub parsing_errors: IndexMap<String, String>,
    /// root module variables set by var files
    pub var_files: VarFileValues,
}

#[derive(Debug)]
pub struct Loader {
    expand_modules: bool,
    excluded_paths: Vec<Regex>,
    var_files: Vec<PathBuf>,
    documents: HashMap<PathBuf, Option<Arc<FileDefinition>>>,
    parsing_errors: IndexMap<String, String>,
}

impl Loader {
    pub fn new(expand_modules: bool) -> Self {
        Self {
            expand_modules,
            excluded_paths: vec![],
            var_files: vec![],
            documents: Default::default(),
            parsing_errors: Default::default(),
        }
    }

    /// Skip files and module directories matching any of `patterns`
    pub fn excluding(mut self, patterns: &[Regex]) -> Self {
        self.excluded_paths = patterns.to_vec();
        self
    }

    /// Read root module variable values from these `.tfvars` files
    pub fn with_var_files(mut self, files: &[PathBuf]) -> Self {
        self.var_files = files.to_vec();
        self
    }

    pub fn load_directory(mut self, root: &Path) -> Result<Loaded, LoadError> {
        let root = root.canonicalize()?;
        let files = config_files(&root, &self.excluded_paths)?;
        if files.is_empty() {
            tracing::warn!(root=%root.display(), "no configuration files found");
        }

        let mut definitions = Definitions::default();
        let mut root_keys = vec![];
        for file in files {
            if let Some(definition) = self.document(&file) {
                let key = DefinitionKey::new(file);
                definitions.insert(key.clone(), (*definition).clone());
                root_keys.push(key);
            }
        }

        if self.expand_modules {
            let mut ancestors = vec![root.clone()];
            for key in &root_keys {
                self.expand(&mut definitions, key, &mut ancestors);
            }
        }

        let var_files = self.load_var_files();
        Ok(Loaded {
            root,
            definitions,
            parsing_errors: self.parsing_errors,
            var_files,
        })
    }

    /// Load an explicit list of files; module calls are not followed
    pub fn load_files(mut self, files: &[PathBuf]) -> Loaded {
        let mut absolute = vec![];
        for file in files {
            if !has_config_extension(file) {
                tracing::debug!(path=%file.display(), "skipping file without configuration extension");
                continue;
            }
            if is_excluded(&self.excluded_paths, file) {
                tracing::debug!(path=%file.display(), "skipping excluded file");
                continue;
            }
            match file.canonicalize() {
                Ok(path) => absolute.push(path),
                Err(err) => {
                    tracing::warn!(path=%file.display(), %err, "unable to resolve file");
                    self.parsing_errors
                        .insert(file.display().to_string(), err.to_string());
                }
            }
        }

        let mut definitions = Definitions::default();
        for file in &absolute {
            if let Some(definition) = self.document(file) {
                definitions.insert(DefinitionKey::new(file.clone()), (*definition).clone());
            }
        }

        let var_files = self.load_var_files();
        Loaded {
            root: crate::util::common_parent(&absolute),
            definitions,
            parsing_errors: self.parsing_errors,
            var_files,
        }
    }

    /// Variable values of all var files; a variable set twice keeps the later value
    fn load_var_files(&mut self) -> VarFileValues {
        let mut values = VarFileValues::new();
        for file in std::mem::take(&mut self.var_files) {
            match read_var_file(&file) {
                Ok((path, variables)) => {
                    tracing::info!(path=%path.display(), variables = variables.len(), "loaded var file");
                    for (name, value) in variables {
                        values.insert(
                            name,
                            VarFileValue {
                                file: path.clone(),
                                value,
                            },
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(path=%file.display(), %err, "failed to load var file");
                    self.parsing_errors
                        .insert(file.display().to_string(), error_message(&err));
                }
            }
        }
        values
    }

    fn document(&mut self, path: &Path) -> Option<Arc<FileDefinition>> {
        if let Some(cached) = self.documents.get(path) {
            return cached.clone();
        }

        let parsed = match HclDocument::load(path) {
            Ok(document) => Some(Arc::new(document.to_definition())),
            Err(err) => {
                tracing::warn!(path=%path.display(), %err, "failed to parse file");
                self.parsing_errors
                    .insert(path.display().to_string(), error_message(&err));
                None
            }
        };

        self.documents.insert(path.to_path_buf(), parsed.clone());
        parsed
    }

    /// Load the module calls of `key` and recurse into the loaded files
    ///
    /// `ancestors` holds the module directories of the current call chain; a module that
    /// calls one of its ancestors is not expanded again.
    fn expand(
        &mut self,
        definitions: &mut Definitions,
        key: &DefinitionKey,
        ancestors: &mut Vec<PathBuf>,
    ) {
        let calls: Vec<(String, Option<String>, Value)> = match definitions.get(key) {
            Some(file) => file
                .blocks_of(crate::definitions::BlockType::Module)
                .iter()
                .filter_map(|block| {
                    block
                        .module_call()
                        .map(|call| (call.name.clone(), call.source.clone(), block.config.clone()))
                })
                .collect(),
            None => return,
        };

        let caller_dir = key.file_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut ordinal = 0;

        for (name, source, config) in calls {
            let Some(source) = source.filter(|source| is_local_source(source)) else {
                tracing::debug!(module=%name, "module source is not local, not expanding");
                continue;
            };

            let module_dir = normalize_path(&caller_dir.join(&source));
            if is_excluded(&self.excluded_paths, &module_dir) {
                tracing::debug!(module=%name, directory=%module_dir.display(), "module directory is excluded, not expanding");
                continue;
            }
            if ancestors.contains(&module_dir) {
                tracing::warn!(
                    module=%name,
                    directory=%module_dir.display(),
                    "module calls one of its ancestors, not expanding"
                );
                continue;
            }

            let files = match config_files(&module_dir, &self.excluded_paths) {
                Ok(files) if files.is_empty() => {
                    let err = LoadError::NoFilesFound;
                    tracing::warn!(module=%name, %err, directory=%module_dir.display(), "empty module directory");
                    continue;
                }
                Ok(files) => files,
                Err(err) => {
                    tracing::warn!(module=%name, %err, directory=%module_dir.display(), "unable to read module directory");
                    continue;
                }
            };

            let mut children = vec![];
            for instance in instance_keys(&name, &config) {
                for file in &files {
                    let Some(definition) = self.document(file) else {
                        continue;
                    };
                    let child = DefinitionKey::with_module(
                        file.clone(),
                        ModuleSource {
                            caller: key.clone(),
                            name: name.clone(),
                            instance: instance.clone(),
                            ordinal,
                        },
                    );
                    definitions.insert(child.clone(), (*definition).clone());
                    children.push(child);
                }
                ordinal += 1;
            }

            tracing::debug!(module=%name, caller=%key, instances=children.len(), "module expanded");
            if let Some(call) = definitions
                .get_mut(key)
                .and_then(|file| {
                    file.blocks
                        .get_mut(&crate::definitions::BlockType::Module)?
                        .iter_mut()
                        .filter_map(|block| block.module_call_mut())
                        .find(|call| call.name == name)
                })
            {
                call.resolved_child_paths = children.clone();
            }

            ancestors.push(module_dir);
            for child in &children {
                self.expand(definitions, child, ancestors);
            }
            ancestors.pop();
        }
    }
}

fn is_local_source(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../")
}

fn has_config_extension(path: &Path) -> bool {
    let is_lock_file = path.file_name().is_some_and(|name| name == LOCK_FILE);
    !is_lock_file
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| FILE_EXTENSIONS.contains(&ext))
}

fn error_message(err: &LoadError) -> String {
    match err {
        LoadError::HclParseFailed(inner) => format!("{err}: {inner}"),
        LoadError::IoError(inner) => format!("{err}: {inner}"),
        LoadError::NoFilesFound => err.to_string(),
    }
}

/// Top-level attributes of a `.tfvars` file, with the file's canonical path
fn read_var_file(path: &Path) -> Result<(PathBuf, IndexMap<String, Value>), LoadError> {
    let path = path.canonicalize()?;
    let text = std::fs::read_to_string(&path)?;
    let body: hcl::Body = hcl_edit::parser::parse_body(&text)?.into();
    let variables = match Value::from(body) {
        Value::Object(object) => object,
        _ => IndexMap::new(),
    };
    Ok((path, variables))
}

/// Configuration files of one directory, sorted by name, without excluded ones
fn config_files(dir: &Path, excluded: &[Regex]) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = vec![];
    for dir_entry in std::fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_file() {
            continue;
        }

        let path = dir_entry.path();
        if has_config_extension(&path) && !is_excluded(excluded, &path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Instances a module call expands to
///
/// `None` stands for a singular call. A `count` or `for_each` that is not a literal cannot
/// be expanded here and is treated as a singular call, as is a `count` above
/// [MAX_MODULE_INSTANCES].
fn instance_keys(name: &str, config: &Value) -> Vec<Option<InstanceKey>> {
    if let Some(count) = config.get("count") {
        return match count.as_i64() {
            Some(count) if count > MAX_MODULE_INSTANCES => {
                tracing::warn!(module=%name, count, limit = MAX_MODULE_INSTANCES, "count exceeds instance limit, expanding once");
                vec![None]
            }
            Some(count) => (0..count.max(0) as usize)
                .map(|index| Some(InstanceKey::Index(index)))
                .collect(),
            None => {
                tracing::debug!(module=%name, "count is not a literal, expanding once");
                vec![None]
            }
        };
    }

    if let Some(for_each) = config.get("for_each") {
        let keys: Option<Vec<String>> = match for_each {
            Value::Object(object) => Some(object.keys().cloned().collect()),
            Value::Array(array) => array.iter().map(Value::render).collect(),
            _ => None,
        };

        return match keys {
            Some(keys) => keys
                .into_iter()
                .map(|key| Some(InstanceKey::Key(key)))
                .collect(),
            None => {
                tracing::debug!(module=%name, "for_each is not a literal, expanding once");
                vec![None]
            }
        };
    }

    vec![None]
}
