// Record Parser - members.csv + visits.csv
//
// Header-driven loading: columns are found by name, extra columns are
// ignored, values are trimmed. Malformed rows are skipped and reported as
// RowIssue values; only structural problems (missing file, missing column)
// fail the load.

use crate::error::{ReportError, Result};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    pub barcode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub visit_id: String,
    /// Empty when the visitor had no card to scan
    pub barcode: String,
    pub reservation_id: Option<String>,
}

/// Why a row was left out of the loaded records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    FieldCount { expected: usize, found: usize },
    MissingField { field: &'static str },
    Unreadable { message: String },
    /// First-wins: the row that already owns the barcode is kept
    DuplicateBarcode { barcode: String, kept_member_id: String },
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            IssueKind::MissingField { field } => write!(f, "missing {}", field),
            IssueKind::Unreadable { message } => write!(f, "unreadable row: {}", message),
            IssueKind::DuplicateBarcode {
                barcode,
                kept_member_id,
            } => write!(
                f,
                "duplicate barcode {} (kept member {})",
                barcode, kept_member_id
            ),
        }
    }
}

/// A skipped input row; `line` is 1-based with the header on line 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub line: u64,
    #[serde(flatten)]
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub rows_read: usize,
    pub rows_loaded: usize,
    pub rows_skipped: usize,
}

/// Records loaded from one file, plus what was skipped on the way
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub records: T,
    pub issues: Vec<RowIssue>,
    pub stats: LoadStats,
}

// ============================================================================
// MEMBER INDEX
// ============================================================================

/// barcode -> Member, one entry per barcode
#[derive(Debug, Clone, Default)]
pub struct MemberIndex {
    by_barcode: HashMap<String, Member>,
}

impl MemberIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the barcode is already taken. On conflict the existing
    /// member is returned and the index is unchanged.
    pub fn insert_first_wins(&mut self, member: Member) -> std::result::Result<(), &Member> {
        use std::collections::hash_map::Entry;

        match self.by_barcode.entry(member.barcode.clone()) {
            Entry::Occupied(existing) => Err(&*existing.into_mut()),
            Entry::Vacant(slot) => {
                slot.insert(member);
                Ok(())
            }
        }
    }

    pub fn get(&self, barcode: &str) -> Option<&Member> {
        self.by_barcode.get(barcode)
    }

    pub fn contains(&self, member: &Member) -> bool {
        self.get(&member.barcode) == Some(member)
    }

    pub fn len(&self) -> usize {
        self.by_barcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_barcode.is_empty()
    }
}

#[cfg(test)]
impl FromIterator<Member> for MemberIndex {
    fn from_iter<I: IntoIterator<Item = Member>>(iter: I) -> Self {
        let mut index = MemberIndex::new();
        for member in iter {
            let _ = index.insert_first_wins(member);
        }
        index
    }
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_members(path: &Path) -> Result<Loaded<MemberIndex>> {
    read_members(open_input(path)?, path)
}

pub fn load_visits(path: &Path) -> Result<Loaded<Vec<Visit>>> {
    read_visits(open_input(path)?, path)
}

/// Parse members from any reader. `source` is only used in messages.
pub fn read_members<R: Read>(reader: R, source: &Path) -> Result<Loaded<MemberIndex>> {
    let mut table = Table::open(reader, source)?;
    let mut index = MemberIndex::new();

    let columns = match &table.headers {
        Some(headers) => Some((
            column_index(headers, "member_id", source)?,
            column_index(headers, "barcode", source)?,
        )),
        None => None,
    };

    if let Some((member_col, barcode_col)) = columns {
        while let Some((line, row)) = table.next_row()? {
            let member_id = field(&row, member_col);
            let barcode = field(&row, barcode_col);

            if member_id.is_empty() {
                table.skip(line, IssueKind::MissingField { field: "member_id" });
                continue;
            }
            if barcode.is_empty() {
                table.skip(line, IssueKind::MissingField { field: "barcode" });
                continue;
            }

            let member = Member {
                member_id: member_id.to_string(),
                barcode: barcode.to_string(),
            };
            if let Err(existing) = index.insert_first_wins(member) {
                let kind = IssueKind::DuplicateBarcode {
                    barcode: barcode.to_string(),
                    kept_member_id: existing.member_id.clone(),
                };
                table.skip(line, kind);
                continue;
            }
            table.stats.rows_loaded += 1;
        }
    }

    Ok(table.finish(index))
}

/// Parse visits from any reader, preserving input order.
pub fn read_visits<R: Read>(reader: R, source: &Path) -> Result<Loaded<Vec<Visit>>> {
    let mut table = Table::open(reader, source)?;
    let mut visits = Vec::new();

    let columns = match &table.headers {
        Some(headers) => Some((
            column_index(headers, "visit_id", source)?,
            column_index(headers, "barcode", source)?,
            optional_column_index(headers, "reservation_id"),
        )),
        None => None,
    };

    if let Some((visit_col, barcode_col, reservation_col)) = columns {
        while let Some((line, row)) = table.next_row()? {
            let visit_id = field(&row, visit_col);
            if visit_id.is_empty() {
                table.skip(line, IssueKind::MissingField { field: "visit_id" });
                continue;
            }

            let reservation_id = reservation_col
                .map(|col| field(&row, col))
                .filter(|value| !value.is_empty())
                .map(str::to_string);

            visits.push(Visit {
                visit_id: visit_id.to_string(),
                barcode: field(&row, barcode_col).to_string(),
                reservation_id,
            });
            table.stats.rows_loaded += 1;
        }
    }

    Ok(table.finish(visits))
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| ReportError::InputNotFound {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// TABLE READER (shared row bookkeeping)
// ============================================================================

struct Table<'a, R: Read> {
    reader: csv::Reader<R>,
    source: &'a Path,
    /// None for a zero-byte input
    headers: Option<StringRecord>,
    issues: Vec<RowIssue>,
    stats: LoadStats,
}

impl<'a, R: Read> Table<'a, R> {
    fn open(reader: R, source: &'a Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| csv_error(source, e))?
            .clone();

        let headers = if headers.is_empty() {
            debug!(file = %source.display(), "empty input, no header row");
            None
        } else {
            Some(headers)
        };

        Ok(Self {
            reader,
            source,
            headers,
            issues: Vec::new(),
            stats: LoadStats::default(),
        })
    }

    /// Next well-formed row. Rows with the wrong field count or that fail
    /// to decode are skipped here; IO failures abort the load.
    fn next_row(&mut self) -> Result<Option<(u64, StringRecord)>> {
        let expected = self.headers.as_ref().map_or(0, StringRecord::len);
        let mut row = StringRecord::new();

        loop {
            match self.reader.read_record(&mut row) {
                Ok(false) => return Ok(None),
                Ok(true) => {
                    self.stats.rows_read += 1;
                    let line = row.position().map_or(0, |p| p.line());
                    if row.len() != expected {
                        let found = row.len();
                        self.skip(line, IssueKind::FieldCount { expected, found });
                        continue;
                    }
                    return Ok(Some((line, row)));
                }
                Err(e) if !e.is_io_error() => {
                    self.stats.rows_read += 1;
                    let line = e.position().map_or(0, |p| p.line());
                    let message = e.to_string();
                    self.skip(line, IssueKind::Unreadable { message });
                }
                Err(e) => return Err(csv_error(self.source, e)),
            }
        }
    }

    fn skip(&mut self, line: u64, kind: IssueKind) {
        warn!(
            file = %file_name(self.source),
            line,
            "skipping row: {}",
            kind
        );
        self.stats.rows_skipped += 1;
        self.issues.push(RowIssue { line, kind });
    }

    fn finish<T>(self, records: T) -> Loaded<T> {
        debug!(
            file = %file_name(self.source),
            read = self.stats.rows_read,
            loaded = self.stats.rows_loaded,
            skipped = self.stats.rows_skipped,
            "input loaded"
        );
        Loaded {
            records,
            issues: self.issues,
            stats: self.stats,
        }
    }
}

fn column_index(headers: &StringRecord, column: &'static str, source: &Path) -> Result<usize> {
    optional_column_index(headers, column).ok_or_else(|| ReportError::MissingColumn {
        path: source.to_path_buf(),
        column,
    })
}

fn optional_column_index(headers: &StringRecord, column: &str) -> Option<usize> {
    headers
        .iter()
        .position(|name| name.trim_start_matches('\u{feff}') == column)
}

fn field(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or("")
}

fn csv_error(source: &Path, e: csv::Error) -> ReportError {
    ReportError::Csv {
        path: source.to_path_buf(),
        source: e,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn members(csv: &str) -> Loaded<MemberIndex> {
        read_members(csv.as_bytes(), Path::new("members.csv")).unwrap()
    }

    fn visits(csv: &str) -> Loaded<Vec<Visit>> {
        read_visits(csv.as_bytes(), Path::new("visits.csv")).unwrap()
    }

    #[test]
    fn test_load_members_skips_invalid_and_keeps_first_duplicate() {
        let loaded = members("member_id,barcode\nm1,b1\n,b2\nm2,\nm3,b1\n");

        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records.get("b1").unwrap().member_id, "m1");
        assert_eq!(
            loaded.stats,
            LoadStats {
                rows_read: 4,
                rows_loaded: 1,
                rows_skipped: 3
            }
        );

        let kinds: Vec<_> = loaded.issues.iter().map(|i| (i.line, i.kind.clone())).collect();
        assert_eq!(
            kinds,
            vec![
                (3, IssueKind::MissingField { field: "member_id" }),
                (4, IssueKind::MissingField { field: "barcode" }),
                (
                    5,
                    IssueKind::DuplicateBarcode {
                        barcode: "b1".to_string(),
                        kept_member_id: "m1".to_string()
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_member_columns_in_any_order() {
        let loaded = members("barcode,notes,member_id\nB1,vip,M1\n");

        let member = loaded.records.get("B1").unwrap();
        assert_eq!(member.member_id, "M1");
        assert!(loaded.issues.is_empty());
    }

    #[test]
    fn test_values_are_trimmed() {
        let loaded = members("member_id,barcode\n  M1 , B1 \n");
        assert_eq!(loaded.records.get("B1").unwrap().member_id, "M1");
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let err = read_members("member_id,card\nM1,B1\n".as_bytes(), Path::new("members.csv"))
            .unwrap_err();

        match err {
            ReportError::MissingColumn { column, .. } => assert_eq!(column, "barcode"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_field_count_is_skipped() {
        let loaded = visits("visit_id,barcode\nV1,B1\nV2,B2,extra\nV3\nV4,B4\n");

        let ids: Vec<_> = loaded.records.iter().map(|v| v.visit_id.as_str()).collect();
        assert_eq!(ids, vec!["V1", "V4"]);
        assert_eq!(loaded.stats.rows_skipped, 2);
        assert_eq!(
            loaded.issues[0].kind,
            IssueKind::FieldCount {
                expected: 2,
                found: 3
            }
        );
        assert_eq!(loaded.issues[0].line, 3);
    }

    #[test]
    fn test_load_visits_skips_missing_visit_id_and_normalizes_reservation() {
        let loaded = visits("visit_id,barcode,reservation_id\nv1,b1,\n,b2,r2\nv3,,r3\n");

        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].visit_id, "v1");
        assert_eq!(loaded.records[0].reservation_id, None);
        // An empty barcode is a walk-in, not a malformed row
        assert_eq!(loaded.records[1].barcode, "");
        assert_eq!(loaded.records[1].reservation_id.as_deref(), Some("r3"));
        assert_eq!(loaded.stats.rows_skipped, 1);
    }

    #[test]
    fn test_reservation_column_is_optional() {
        let loaded = visits("barcode,visit_id\nB1,V1\n");
        assert_eq!(
            loaded.records,
            vec![Visit {
                visit_id: "V1".to_string(),
                barcode: "B1".to_string(),
                reservation_id: None,
            }]
        );
    }

    #[test]
    fn test_header_only_and_zero_byte_inputs_load_nothing() {
        let header_only = visits("visit_id,barcode\n");
        assert!(header_only.records.is_empty());
        assert_eq!(header_only.stats, LoadStats::default());

        let zero_bytes = visits("");
        assert!(zero_bytes.records.is_empty());
        assert!(zero_bytes.issues.is_empty());
    }

    #[test]
    fn test_byte_order_mark_in_header() {
        let loaded = members("\u{feff}member_id,barcode\nM1,B1\n");
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn test_missing_file_is_input_not_found() {
        let err = load_visits(Path::new("/definitely/not/here/visits.csv")).unwrap_err();
        assert!(matches!(err, ReportError::InputNotFound { .. }));
        assert!(err.is_input_error());
    }
}
