//! # tfscan - module-aware policy checks for terraform configurations
//!
//! ## Introduction for developers
//!
//! Read this to understand how `tfscan` works internally.
//!
//! ### Loading files
//!
//! Every `.tf`/`.hcl` file is parsed as a `body` ([hcl_edit::structure::Body]) by
//! [hcl_documents::HclDocument] and turned into typed [definitions::Block]s. Only the
//! block kinds terraform cares about survive (`resource`, `data`, `provider`, `module`,
//! `variable`, `locals`, `output`); each keeps its line range, its configuration as a
//! [value::Value] tree and the traversals it references.
//!
//! [loader::Loader] then follows local module calls. A module directory is loaded once per
//! call instance:
//!
//! ```hcl
//! module "network" {
//!   source = "./network"
//!   count  = 2
//! }
//! ```
//!
//! yields two copies of `network/main.tf`, keyed `network/main.tf` + `module.network[0]` and
//! `network/main.tf` + `module.network[1]` ([definitions::DefinitionKey]).
//!
//! ### Addressing
//!
//! Every checked block gets a canonical address, e.g. `module.network[1].aws_subnet.public`.
//! [address::AddressResolver] implements the two strategies:
//!
//! - **nested** (default): the address is derived from the definition key's module chain
//!   and stored on the block before any check runs
//! - **referrer** (legacy): the address is reconstructed from the module call that lists the
//!   file's legacy key (`network/main.tf[main.tf#1]`) among its resolved child paths;
//!   lookups are cached in [address::ReferrerCache]
//!
//! ### Context and skip directives
//!
//! [context::ContextIndex] keeps line range, code lines and skip directives
//! (`#tfscan:skip=CKV_AWS_20:reason`) of every block. Directives on a `module` block are
//! pushed down to every block the call instantiates by [skip], recursively and without
//! ever removing a directive.
//!
//! ### Checks
//!
//! [runner::Runner] dispatches every `resource`, `data`, `provider` and `module` block to
//! the matching [checks::Registry]. Relational checks ([checks::GraphCheck]) run over the
//! [graph::ReferenceGraph]. Results become [report::Record]s, enriched with call site,
//! [evaluation] traces and graph breadcrumbs; code blocks are [secrets] redacted.
//!
//! ### Output
//!
//! A [report::Report] serializes via [serde].
pub mod address;
pub mod checks;
pub mod config;
pub mod context;
pub mod definitions;
pub mod evaluation;
pub mod filter;
pub mod graph;
pub mod hcl_documents;
pub mod loader;
pub mod report;
pub mod runner;
pub mod secrets;
pub mod skip;
mod util;
pub mod value;
mod visit;
