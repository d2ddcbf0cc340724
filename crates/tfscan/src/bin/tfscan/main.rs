mod cli;

use tfscan::config::{AddressingStrategy, RunConfig};
use tfscan::filter::RunnerFilter;
use tfscan::graph::ReferenceGraph;
use tfscan::loader::Loader;
use tfscan::report::{Report, Summary};
use tfscan::runner::Runner;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TFSCAN_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Scan(scan_cli) => scan(scan_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli).map(|()| true),
    };

    match command_result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(2);
        }
    }
}

/// Run the scan and print the report
///
/// Returns `false` when a check failed and failures are not soft.
pub fn scan(cli: cli::ScanCommand) -> anyhow::Result<bool> {
    let mut config = run_config(&cli.run)?;
    config.var_files = cli.input.var_files.clone();
    let runner = Runner::new(config);
    let filter = RunnerFilter {
        checks: cli.filter.checks.into_iter().collect(),
        skip_checks: cli.filter.skip_checks.into_iter().collect(),
        ..Default::default()
    }
    .with_omitted_attributes(cli.filter.omit.iter().map(String::as_str))
    .with_excluded_paths(cli.filter.skip_paths.iter().map(String::as_str))?;

    let report = if cli.input.root.is_none() && cli.input.files.is_empty() {
        runner.run(Some(&std::env::current_dir()?), &[], &filter)?
    } else {
        runner.run(cli.input.root.as_deref(), &cli.input.files, &filter)?
    };

    let summary = report.summary();
    output(&cli.output, &report, summary.clone())?;
    Ok(cli.output.soft_fail || summary.failed == 0)
}

/// Environment toggles, overridden by command line flags
fn run_config(args: &cli::RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_env()?;
    if args.legacy_addressing {
        config.addressing = AddressingStrategy::Referrer;
    }
    if args.no_graph {
        config.create_graph = false;
    }
    if args.no_modules {
        config.expand_modules = false;
    }
    Ok(config)
}

#[derive(serde::Serialize)]
struct Output<'a> {
    #[serde(flatten)]
    report: &'a Report,
    summary: Summary,
}

fn output(output: &cli::OutputArgs, report: &Report, summary: Summary) -> anyhow::Result<()> {
    let value = Output { report, summary };
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), &value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), &value)?,
    };

    Ok(())
}

/// (tfscan-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    let config = RunConfig::from_env()?;
    let loaded = Loader::new(config.expand_modules).load_directory(&std::env::current_dir()?)?;

    match cli.command {
        Definitions => println!("{:#?}", loaded.definitions),
        Graph => println!("{:#?}", ReferenceGraph::build(&loaded.definitions)),
    }

    Ok(())
}
