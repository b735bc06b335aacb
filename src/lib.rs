// Visit Report - Core Library
// Exposes the pipeline for the CLI, the API server, and tests

pub mod aggregation;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod validation;

// Re-export commonly used types
pub use aggregation::{
    aggregate, group_visits, rank_members, Aggregation, MemberVisitGroup, TopMember,
    DEFAULT_TOP_N,
};
pub use config::{PipelinePaths, RunOptions};
pub use error::{ReportError, Result};
pub use pipeline::{run_pipeline, RunOutcome};
pub use records::{
    load_members, load_visits, read_members, read_visits,
    IssueKind, LoadStats, Loaded, Member, MemberIndex, RowIssue, Visit,
};
pub use report::{load_summary, render_export, write_all_or_nothing, FileStats, Summary};
pub use validation::{validate_visits, InvalidReason, InvalidVisit, ValidatedVisit, Validation};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
