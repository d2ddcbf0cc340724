//! Scan results
//!
//! A [Report] is append-only: records are pushed in block iteration order and never changed
//! afterwards. Reports of the per-block dispatcher and of the graph checks are combined with
//! [merge_reports] and cleaned with [Report::remove_duplicate_results].
use crate::checks::{CheckOutcome, CheckResult};
use crate::definitions::LineRange;
use crate::evaluation::EvaluationContext;
use crate::graph::EntityBreadcrumbs;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

pub const CHECK_TYPE: &str = "terraform";

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Record {
    pub check_id: String,
    pub check_name: String,
    pub check_result: CheckResult,
    /// `(line number, line)`, secrets redacted
    pub code_block: Vec<(usize, String)>,
    /// path relative to the scan root, with a leading `/`
    pub file_path: String,
    pub file_abs_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_line_range: Option<LineRange>,
    /// entity id under the active addressing strategy
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluations: Option<EvaluationContext>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub entity_tags: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_file_line_range: Option<LineRange>,
    /// nested address, independent of the addressing strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_address: Option<String>,
    /// legacy key of the definition the record was built from
    pub definition_context_file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<EntityBreadcrumbs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_node: Option<ConnectedNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guideline: Option<String>,
}

impl Record {
    pub fn result(&self) -> CheckOutcome {
        self.check_result.result
    }
}

/// Second entity a relational check result is about
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ConnectedNode {
    pub code_block: Vec<(usize, String)>,
    pub file_path: String,
    pub file_abs_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_line_range: Option<LineRange>,
    pub resource: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub entity_tags: IndexMap<String, Value>,
    pub resource_address: String,
}

/// A resource no check produced a result for
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_new::new, serde::Serialize)]
pub struct ExtraResource {
    pub file_abs_path: String,
    pub file_path: String,
    pub resource: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub parsing_errors: usize,
    pub resource_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Report {
    pub check_type: String,
    pub records: Vec<Record>,
    pub extra_resources: IndexSet<ExtraResource>,
    /// `<file path>:<entity id>` of every dispatched resource block, with or without a graph
    pub resources: IndexSet<String>,
    /// files that could not be parsed
    pub parsing_errors: IndexSet<String>,
}

impl Report {
    pub fn new(check_type: impl Into<String>) -> Self {
        Self {
            check_type: check_type.into(),
            ..Default::default()
        }
    }

    pub fn add_record(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records_with(&self, outcome: CheckOutcome) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |record| record.result() == outcome)
    }

    pub fn summary(&self) -> Summary {
        Summary {
            passed: self.records_with(CheckOutcome::Passed).count(),
            failed: self.records_with(CheckOutcome::Failed).count(),
            skipped: self.records_with(CheckOutcome::Skipped).count(),
            parsing_errors: self.parsing_errors.len(),
            resource_count: self.resources.len(),
        }
    }

    /// Drop records repeating an earlier record's check id, file, resource and result
    pub fn remove_duplicate_results(&mut self) {
        let mut seen = HashSet::new();
        let before = self.records.len();
        self.records.retain(|record| {
            seen.insert((
                record.check_id.clone(),
                record.file_path.clone(),
                record.resource.clone(),
                record.result(),
            ))
        });

        let removed = before - self.records.len();
        if removed > 0 {
            tracing::debug!(removed, "removed duplicate results");
        }
    }
}

/// Combine reports of the same check type, keeping record order
pub fn merge_reports(reports: impl IntoIterator<Item = Report>) -> Report {
    let mut merged = Report::default();
    for report in reports {
        if merged.check_type.is_empty() {
            merged.check_type = report.check_type;
        }
        merged.records.extend(report.records);
        merged.extra_resources.extend(report.extra_resources);
        merged.resources.extend(report.resources);
        merged.parsing_errors.extend(report.parsing_errors);
    }
    merged
}
