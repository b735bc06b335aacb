// Report pipeline: parse -> validate -> aggregate -> emit
//
// One synchronous pass. Fatal errors abort before any output file is
// replaced; row-level problems come back in the outcome.

use crate::aggregation::{aggregate, MemberVisitGroup};
use crate::config::{PipelinePaths, RunOptions};
use crate::error::Result;
use crate::records::{load_members, load_visits, RowIssue};
use crate::report::{
    render_export, write_all_or_nothing, FileStats, InputFileStats, OutputFileStats, Summary,
};
use crate::validation::{validate_visits, InvalidVisit};
use std::path::Path;
use tracing::info;

/// Everything a caller might want after a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: Summary,
    pub groups: Vec<MemberVisitGroup>,
    pub invalid: Vec<InvalidVisit>,
    pub member_issues: Vec<RowIssue>,
    pub visit_issues: Vec<RowIssue>,
}

pub fn run_pipeline(paths: &PipelinePaths, options: &RunOptions) -> Result<RunOutcome> {
    info!(
        members = %paths.members.display(),
        visits = %paths.visits.display(),
        "starting report run"
    );

    let members = load_members(&paths.members)?;
    let visits = load_visits(&paths.visits)?;

    let validation = validate_visits(&members.records, visits.records);
    let aggregation = aggregate(validation.valid, &validation.invalid, options.top_n);

    let export = render_export(&aggregation.groups)?;
    let files = FileStats {
        members: InputFileStats {
            path: display(&paths.members),
            rows: members.stats,
        },
        visits: InputFileStats {
            path: display(&paths.visits),
            rows: visits.stats,
        },
        output: OutputFileStats {
            path: display(&paths.output),
            rows_written: aggregation.groups.len(),
        },
    };
    let summary = Summary::from_run(&aggregation, files, &export);
    let summary_json = summary.to_json()?;

    write_all_or_nothing(&[
        (paths.output.as_path(), export.as_slice()),
        (paths.summary.as_path(), summary_json.as_slice()),
    ])?;

    info!(
        run_id = %summary.run_id,
        members = summary.total_members,
        visits = summary.total_visits,
        valid = summary.total_valid_visits,
        walk_ins = summary.total_walk_ins,
        unknown = summary.total_unknown_barcodes,
        "report run complete"
    );

    Ok(RunOutcome {
        summary,
        groups: aggregation.groups,
        invalid: validation.invalid,
        member_issues: members.issues,
        visit_issues: visits.issues,
    })
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
