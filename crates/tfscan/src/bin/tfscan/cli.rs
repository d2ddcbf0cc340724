//! tfscan cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; tfscan ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run policy checks
    ///
    /// Scans the work directory unless a root directory or files are given
    Scan(ScanCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct ScanCommand {
    #[clap(flatten)]
    pub input: InputArgs,

    #[clap(flatten)]
    pub filter: FilterArgs,

    #[clap(flatten)]
    pub run: RunArgs,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Parser, Debug)]
pub struct InputArgs {
    /// Root directory to scan, local modules are followed
    #[clap(short = 'd', long = "root-dir")]
    pub root: Option<PathBuf>,

    /// Scan this file, modules are not followed
    #[clap(short = 'f', long = "file", conflicts_with("root"))]
    pub files: Vec<PathBuf>,

    /// Variable values of the root module, later files win
    #[clap(long = "var-file")]
    pub var_files: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct FilterArgs {
    /// Only run these checks
    #[clap(long = "check", value_delimiter = ',')]
    pub checks: Vec<String>,

    /// Never run these checks
    #[clap(long = "skip-check", value_delimiter = ',')]
    pub skip_checks: Vec<String>,

    /// Mask the value of an attribute in code blocks, given as TYPE:ATTRIBUTE
    ///
    /// TYPE may be `*` to mask the attribute on every entity type.
    #[clap(long = "omit")]
    pub omit: Vec<String>,

    /// Do not load files or module directories whose path matches this regex
    #[clap(long = "skip-path")]
    pub skip_paths: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address module resources through their referring module call
    #[clap(long = "legacy-addressing")]
    pub legacy_addressing: bool,

    /// Do not build the reference graph, skips relational checks
    #[clap(long = "no-graph")]
    pub no_graph: bool,

    /// Do not follow module calls
    #[clap(long = "no-modules")]
    pub no_modules: bool,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,

    /// Exit successfully even if checks failed
    #[clap(long = "soft-fail")]
    pub soft_fail: bool,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded definitions of the work directory
    Definitions,
    /// Reference graph of the work directory
    Graph,
}
