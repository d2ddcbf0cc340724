//! Run-wide toggles, read once before a scan starts
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_ENABLE_NESTED_MODULES: &str = "TFSCAN_ENABLE_NESTED_MODULES";
pub const ENV_EXPAND_MODULES: &str = "TFSCAN_EXPAND_MODULES";
pub const ENV_CREATE_GRAPH: &str = "TFSCAN_CREATE_GRAPH";

/// How resource addresses are computed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressingStrategy {
    /// addresses are computed up front from each file's module chain
    #[default]
    Nested,
    /// addresses are reconstructed from the module call referring to a file
    Referrer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub addressing: AddressingStrategy,
    /// expand local module calls into child definitions
    pub expand_modules: bool,
    /// build the reference graph and run relational checks
    pub create_graph: bool,
    /// `.tfvars` files feeding root module variables, later files win
    pub var_files: Vec<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            addressing: AddressingStrategy::Nested,
            expand_modules: true,
            create_graph: true,
            var_files: vec![],
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let flag = |name: &'static str, default: bool| match vars.get(name) {
            Some(value) => parse_bool(value).ok_or_else(|| ConfigError::InvalidBool {
                name,
                value: value.clone(),
            }),
            None => Ok(default),
        };

        let addressing = if flag(ENV_ENABLE_NESTED_MODULES, true)? {
            AddressingStrategy::Nested
        } else {
            AddressingStrategy::Referrer
        };

        let config = Self {
            addressing,
            expand_modules: flag(ENV_EXPAND_MODULES, true)?,
            create_graph: flag(ENV_CREATE_GRAPH, true)?,
            var_files: vec![],
        };
        tracing::debug!(?config, "run configuration");
        Ok(config)
    }
}

/// Lenient boolean parsing for environment toggles
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be a boolean, got {value:?}")]
    InvalidBool { name: &'static str, value: String },
}
