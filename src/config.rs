// Run configuration
//
// Default locations are only used by the CLI and server adapters; the
// pipeline always receives explicit paths.

use crate::aggregation::DEFAULT_TOP_N;
use std::path::PathBuf;

pub const DEFAULT_MEMBERS_PATH: &str = "data/members.csv";
pub const DEFAULT_VISITS_PATH: &str = "data/visits.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "data/output.csv";
pub const DEFAULT_SUMMARY_PATH: &str = "data/summary.json";

/// Input and output locations for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    pub members: PathBuf,
    pub visits: PathBuf,
    pub output: PathBuf,
    pub summary: PathBuf,
}

impl PipelinePaths {
    pub fn new(
        members: impl Into<PathBuf>,
        visits: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        summary: impl Into<PathBuf>,
    ) -> Self {
        Self {
            members: members.into(),
            visits: visits.into(),
            output: output.into(),
            summary: summary.into(),
        }
    }
}

impl Default for PipelinePaths {
    fn default() -> Self {
        Self::new(
            DEFAULT_MEMBERS_PATH,
            DEFAULT_VISITS_PATH,
            DEFAULT_OUTPUT_PATH,
            DEFAULT_SUMMARY_PATH,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// How many members to keep in the ranking
    pub top_n: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
        }
    }
}
