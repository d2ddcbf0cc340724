#![allow(dead_code)]

use std::path::PathBuf;
use tfscan::config::RunConfig;
use tfscan::filter::RunnerFilter;
use tfscan::report::{Record, Report};
use tfscan::runner::Runner;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TFSCAN_LOG"))
        .with_test_writer()
        .try_init();
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn scan(name: &str, config: RunConfig) -> Report {
    init_logging();
    Runner::new(config)
        .run(Some(&fixture(name)), &[], &RunnerFilter::default())
        .expect("fixture must scan")
}

/// `CHECK RESULT RESOURCE FILE [<- CALLER:START-END]`
pub fn describe(record: &Record) -> String {
    let mut line = format!(
        "{} {:?} {} {}",
        record.check_id,
        record.result(),
        record.resource,
        record.file_path
    );
    if let Some(caller) = &record.caller_file_path {
        line.push_str(&format!(" <- {caller}"));
        if let Some(range) = record.caller_file_line_range {
            line.push_str(&format!(":{}-{}", range.start, range.end));
        }
    }
    line
}

pub fn describe_all(report: &Report) -> Vec<String> {
    report.records.iter().map(describe).collect()
}
