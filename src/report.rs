// Report Emitter - ragged CSV export + JSON summary
//
// Export layout:
//   member_id,barcode,visits
//   M1,B1,V1,V3
//   M2,B2,V2
// One row per member group in (member_id, barcode) order, one trailing
// column per visit in input order. Rows are not padded to a common width.
//
// Outputs are staged as `<name>.tmp` next to the target and only renamed
// into place once every file has been staged.

use crate::aggregation::{Aggregation, MemberVisitGroup, TopMember};
use crate::error::{ReportError, Result};
use crate::records::LoadStats;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const EXPORT_HEADER: [&str; 3] = ["member_id", "barcode", "visits"];

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFileStats {
    pub path: String,
    #[serde(flatten)]
    pub rows: LoadStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFileStats {
    pub path: String,
    pub rows_written: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub members: InputFileStats,
    pub visits: InputFileStats,
    pub output: OutputFileStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    /// Wall-clock time of the run, RFC 3339 UTC with whole seconds
    pub generated_at: DateTime<Utc>,
    pub total_members: usize,
    pub total_visits: usize,
    pub total_valid_visits: usize,
    pub total_walk_ins: usize,
    pub total_unknown_barcodes: usize,
    pub valid_visits_without_reservation: usize,
    pub top_members: Vec<TopMember>,
    pub files: FileStats,
    /// Hex SHA-256 of the export bytes
    pub export_sha256: String,
}

impl Summary {
    pub fn from_run(aggregation: &Aggregation, files: FileStats, export: &[u8]) -> Self {
        Summary {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now().trunc_subsecs(0),
            total_members: files.members.rows.rows_loaded,
            total_visits: files.visits.rows.rows_loaded,
            total_valid_visits: aggregation.total_valid_visits,
            total_walk_ins: aggregation.total_walk_ins,
            total_unknown_barcodes: aggregation.total_unknown_barcodes,
            valid_visits_without_reservation: aggregation.valid_visits_without_reservation,
            top_members: aggregation.top_members.clone(),
            files,
            export_sha256: fingerprint(export),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        Ok(json)
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Read a previously written summary.
pub fn load_summary(path: &Path) -> Result<Summary> {
    let bytes = fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ReportError::InputNotFound {
                path: path.to_path_buf(),
                source,
            }
        } else {
            ReportError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

// ============================================================================
// EXPORT
// ============================================================================

/// Render the export in memory. Deterministic for a given set of groups.
pub fn render_export(groups: &[MemberVisitGroup]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    let export_error = |source: csv::Error| ReportError::Csv {
        path: PathBuf::from("<export>"),
        source,
    };

    writer.write_record(EXPORT_HEADER).map_err(export_error)?;
    for group in groups {
        let row = [group.member.member_id.as_str(), group.member.barcode.as_str()]
            .into_iter()
            .chain(group.visit_ids());
        writer.write_record(row).map_err(export_error)?;
    }

    writer.into_inner().map_err(|e| ReportError::Io {
        path: PathBuf::from("<export>"),
        source: e.into_error(),
    })
}

// ============================================================================
// ATOMIC WRITES
// ============================================================================

/// Write every (path, bytes) pair or none of them.
///
/// All temp files are written first; if any write fails the temp files are
/// removed and no target is touched. Renames happen only after staging.
pub fn write_all_or_nothing(outputs: &[(&Path, &[u8])]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(outputs.len());

    for (target, bytes) in outputs {
        match stage(target, bytes) {
            Ok(temp) => staged.push((temp, *target)),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }

    for (i, (temp, target)) in staged.iter().enumerate() {
        if let Err(source) = fs::rename(temp, target) {
            discard(&staged[i..]);
            return Err(ReportError::Io {
                path: target.to_path_buf(),
                source,
            });
        }
        debug!(path = %target.display(), "output written");
    }

    Ok(())
}

fn stage(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let io_error = |source| ReportError::Io {
        path: target.to_path_buf(),
        source,
    };

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let temp = temp_path(target);
    fs::write(&temp, bytes).map_err(|source| ReportError::Io {
        path: temp.clone(),
        source,
    })?;
    Ok(temp)
}

fn discard(staged: &[(PathBuf, &Path)]) {
    for (temp, _) in staged {
        if let Err(e) = fs::remove_file(temp) {
            warn!(path = %temp.display(), "could not remove temp file: {}", e);
        }
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

// ============================================================================
// TESTS
// ============================================================================
