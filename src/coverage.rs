//! Coverage profile parser.
//!
//! Reads the text profile emitted by `go test -coverprofile`:
//!
//! ```text
//! mode: atomic
//! github.com/acme/lib/author.go:11.81,12.52 3 3
//! github.com/acme/lib/author.go:14.2,16.10 2 0
//! ```
//!
//! Each data line is `file:startLine.startCol,endLine.endCol statements count`.
//! Parsing is all or nothing: one bad line fails the whole report.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::num::ParseIntError;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const MODE_PREFIX: &str = "mode: ";

static BLOCK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+):([0-9]+).([0-9]+),([0-9]+).([0-9]+) ([0-9]+) ([0-9]+)$")
        .expect("block line pattern is valid")
});

/// One `start,end statements count` unit of a profile.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Block {
    pub start_line: u64,
    pub start_col: u64,
    pub end_line: u64,
    pub end_col: u64,
    pub num_statements: u64,
    pub count: u64,
}

impl Block {
    pub fn is_covered(&self) -> bool {
        self.count > 0
    }
}

/// All blocks reported for one source file, in input order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileProfile {
    pub file_name: String,
    pub mode: String,
    pub blocks: Vec<Block>,
}

impl FileProfile {
    pub fn statements(&self) -> (u64, u64) {
        tally(self.blocks.iter())
    }

    /// Percentage of this file's statements that ran at least once.
    pub fn coverage(&self) -> f64 {
        let (covered, total) = self.statements();
        percentage(covered, total)
    }
}

/// A parsed report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoverageReport {
    /// The mode of the first declaration; `None` for an empty report.
    pub mode: Option<String>,
    pub files: BTreeMap<String, FileProfile>,
    /// `100 × covered / total` statements, `0` when there are none.
    pub coverage: f64,
}

impl CoverageReport {
    /// Recomputes the aggregate percentage from the blocks.
    pub fn recompute(&self) -> f64 {
        let (covered, total) = tally(self.files.values().flat_map(|f| f.blocks.iter()));
        percentage(covered, total)
    }

    pub fn statement_count(&self) -> u64 {
        tally(self.files.values().flat_map(|f| f.blocks.iter())).1
    }
}

/// Why a report was rejected.
#[derive(Debug)]
pub enum InvalidReportKind {
    MissingMode,
    Malformed,
    Number(ParseIntError),
}

/// A report that does not follow the profile format.
///
/// Callers see one error class; the kind is kept for logs.
#[derive(Debug, thiserror::Error)]
#[error("invalid-report: line {line_number} [{line}]")]
pub struct InvalidReport {
    pub line_number: usize,
    pub line: String,
    pub kind: InvalidReportKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Invalid(#[from] InvalidReport),
    #[error("unable to read report: {0}")]
    Io(#[from] io::Error),
}

/// Parses a coverage profile.
pub fn parse<R: BufRead>(reader: R) -> Result<CoverageReport, ReportError> {
    let mut files: BTreeMap<String, FileProfile> = BTreeMap::new();
    let mut first_mode: Option<String> = None;
    let mut mode: Option<String> = None;
    let (mut covered, mut total) = (0u64, 0u64);

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.strip_suffix('\r').unwrap_or(&line);
        let invalid = |kind| InvalidReport { line_number: index + 1, line: line.to_owned(), kind };

        if line.trim().is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix(MODE_PREFIX) {
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid(InvalidReportKind::MissingMode).into());
            }
            first_mode.get_or_insert_with(|| name.to_owned());
            mode = Some(name.to_owned());
            continue;
        }

        let Some(mode) = mode.as_deref() else {
            return Err(invalid(InvalidReportKind::MissingMode).into());
        };

        let captures = BLOCK_LINE
            .captures(line)
            .ok_or_else(|| invalid(InvalidReportKind::Malformed))?;
        let field = |i: usize| captures[i].parse::<u64>();
        let block = (|| {
            Ok::<_, ParseIntError>(Block {
                start_line: field(2)?,
                start_col: field(3)?,
                end_line: field(4)?,
                end_col: field(5)?,
                num_statements: field(6)?,
                count: field(7)?,
            })
        })()
        .map_err(|e| invalid(InvalidReportKind::Number(e)))?;

        total = total.saturating_add(block.num_statements);
        if block.is_covered() {
            covered = covered.saturating_add(block.num_statements);
        }

        let file_name = &captures[1];
        files
            .entry(file_name.to_owned())
            .or_insert_with(|| FileProfile {
                file_name: file_name.to_owned(),
                mode: mode.to_owned(),
                blocks: Vec::new(),
            })
            .blocks
            .push(block);
    }

    Ok(CoverageReport { mode: first_mode, files, coverage: percentage(covered, total) })
}

fn tally<'a>(blocks: impl Iterator<Item = &'a Block>) -> (u64, u64) {
    blocks.fold((0, 0), |(covered, total), block| {
        let n = block.num_statements;
        let covered = if block.is_covered() { covered.saturating_add(n) } else { covered };
        (covered, total.saturating_add(n))
    })
}

fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    covered as f64 / total as f64 * 100.0
}
