//! Tabular data model shared by the extraction, normalisation and
//! spreadsheet stages.
//!
//! ```text
//! PageLayout ──▶ ExtractedTable ──▶ NormalizedTable ──▶ worksheet
//!  (engine)       (ladder)           (normalizer)        (renderer)
//! ```
//!
//! [`ExtractedTable`] is whatever a strategy managed to read: labels may be
//! synthetic, missing or two rows deep, rows may be ragged. A
//! [`NormalizedTable`] can only be built through a checked constructor, so
//! holding one guarantees the rectangular, labelled, non-empty shape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Text that stands in for a missing value in extracted data.
const NULL_MARKER: &str = "nan";

/// Prefix of positional labels invented by an extractor.
pub const SYNTHETIC_PREFIX: &str = "Unnamed";

/// Label text an extractor invents for an unlabelled column:
/// `Unnamed: 3`, or `Unnamed: 1_level_0` inside a multi-level header.
static RE_SYNTHETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Unnamed: \d+(?:_level_\d+)?$").unwrap());

/// True if `s` is an extractor-generated positional label rather than
/// header text that happens to start with "Unnamed".
pub fn is_synthetic_label(s: &str) -> bool {
    RE_SYNTHETIC.is_match(s.trim())
}

/// Plain number, optionally signed, with an optional leading currency
/// symbol and comma thousands separators.
static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:[$€£¥]\s?[+-]?)?(?:\d[\d,]*(?:\.\d+)?|\.\d+)$").unwrap()
});

/// True if `s` reads as a plain number once thousands separators and a
/// leading currency symbol are ignored. `"1,200"`, `"$250"`, `"-3.5"` are
/// numeric; `"12 kg"`, `"nan"`, `""` are not.
pub fn looks_numeric(s: &str) -> bool {
    let t = s.trim();
    t.chars().any(|c| c.is_ascii_digit()) && RE_NUMERIC.is_match(t)
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Build a text cell, trimming surrounding whitespace; blank input
    /// becomes [`Cell::Empty`].
    pub fn text(s: impl AsRef<str>) -> Self {
        let t = s.as_ref().trim();
        if t.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(t.to_string())
        }
    }

    /// True for empty cells, blank text and the null marker.
    pub fn is_null(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => {
                let t = s.trim();
                t.is_empty() || t.eq_ignore_ascii_case(NULL_MARKER)
            }
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// True if the value is a number or numeric-looking text.
    pub fn is_numeric(&self) -> bool {
        match self {
            Cell::Number(n) => !n.is_nan(),
            Cell::Text(s) => looks_numeric(s),
            Cell::Empty => false,
        }
    }

    /// Display form used for labels, widths and worksheet text.
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

/// A column label as produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ColumnLabel {
    /// A label read from the page.
    Named(String),
    /// Positional placeholder (`Unnamed: <index>`), 0-based.
    Synthetic(usize),
    /// No label at all (blank header cell, null marker).
    Missing,
    /// A header spanning several visual rows, top row first.
    MultiLevel(Vec<String>),
}

impl ColumnLabel {
    /// Build a label from header text, mapping blank and null text to
    /// [`ColumnLabel::Missing`].
    pub fn from_header(s: impl AsRef<str>) -> Self {
        if Cell::text(s.as_ref()).is_null() {
            ColumnLabel::Missing
        } else {
            ColumnLabel::Named(s.as_ref().trim().to_string())
        }
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLabel::Named(s) => f.write_str(s),
            ColumnLabel::Synthetic(i) => write!(f, "{SYNTHETIC_PREFIX}: {i}"),
            ColumnLabel::Missing => Ok(()),
            ColumnLabel::MultiLevel(parts) => write!(f, "({})", parts.join(", ")),
        }
    }
}

/// Which rung of the extraction ladder produced a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Ruling-line grid, first grid row is the header.
    LatticeSingleHeader,
    /// Ruling-line grid, first two grid rows form a two-level header.
    LatticeTwoRowHeader,
    /// Whitespace-aligned columns, first line is the header.
    StreamHeader,
    /// Whitespace-aligned columns, no header assumed.
    StreamRaw,
}

impl StrategyId {
    /// Ladder order, highest priority first.
    pub const LADDER: [StrategyId; 4] = [
        StrategyId::LatticeSingleHeader,
        StrategyId::LatticeTwoRowHeader,
        StrategyId::StreamHeader,
        StrategyId::StreamRaw,
    ];
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyId::LatticeSingleHeader => "lattice/header=1",
            StrategyId::LatticeTwoRowHeader => "lattice/header=2",
            StrategyId::StreamHeader => "stream/header=1",
            StrategyId::StreamRaw => "stream/raw",
        };
        f.write_str(s)
    }
}

/// Raw table read by one extraction strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// Strategy that produced the table.
    pub strategy: StrategyId,
    /// First and last page (1-indexed, inclusive) the table came from.
    pub pages: (usize, usize),
    /// Column labels; may be shorter or longer than the rows.
    pub labels: Vec<ColumnLabel>,
    /// Data rows in reading order; may be ragged.
    pub rows: Vec<Vec<Cell>>,
}

impl ExtractedTable {
    /// True if no data cell carries a value.
    pub fn is_blank(&self) -> bool {
        self.rows.iter().flatten().all(Cell::is_null)
    }
}

/// Shape violations rejected by [`NormalizedTable::try_new`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TableShapeError {
    #[error("table has no columns")]
    NoColumns,
    #[error("table has no rows")]
    NoRows,
    #[error("column {0} has an empty label")]
    EmptyLabel(usize),
    #[error("duplicate column label '{0}'")]
    DuplicateLabel(String),
    #[error("row {row} has {found} cells, expected {expected}")]
    Ragged {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("row {0} is entirely empty")]
    EmptyRow(usize),
    #[error("column '{0}' is entirely empty")]
    EmptyColumn(String),
}

/// Rectangular table under a flat list of unique, non-empty labels, with no
/// entirely empty row or column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl NormalizedTable {
    /// Build a table, checking every shape invariant.
    pub fn try_new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, TableShapeError> {
        if columns.is_empty() {
            return Err(TableShapeError::NoColumns);
        }
        if rows.is_empty() {
            return Err(TableShapeError::NoRows);
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for (i, label) in columns.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(TableShapeError::EmptyLabel(i));
            }
            if !seen.insert(label.as_str()) {
                return Err(TableShapeError::DuplicateLabel(label.clone()));
            }
        }
        for (r, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TableShapeError::Ragged {
                    row: r,
                    found: row.len(),
                    expected: columns.len(),
                });
            }
            if row.iter().all(Cell::is_null) {
                return Err(TableShapeError::EmptyRow(r));
            }
        }
        for (c, label) in columns.iter().enumerate() {
            if rows.iter().all(|row| row[c].is_null()) {
                return Err(TableShapeError::EmptyColumn(label.clone()));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Convenience constructor from string slices, for tests and callers
    /// holding plain text.
    pub fn from_strings<S: AsRef<str>>(
        columns: &[S],
        rows: &[Vec<S>],
    ) -> Result<Self, TableShapeError> {
        Self::try_new(
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(Cell::text).collect())
                .collect(),
        )
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Re-express the table as an extracted one, so it can be fed back
    /// through the normalizer.
    pub fn to_extracted(&self, strategy: StrategyId) -> ExtractedTable {
        ExtractedTable {
            strategy,
            pages: (1, 1),
            labels: self
                .columns
                .iter()
                .map(|c| ColumnLabel::Named(c.clone()))
                .collect(),
            rows: self.rows.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_detection() {
        assert!(Cell::Empty.is_null());
        assert!(Cell::Text("   ".into()).is_null());
        assert!(Cell::Text("NaN".into()).is_null());
        assert!(!Cell::Text("X".into()).is_null());
        assert!(!Cell::Number(0.0).is_null());
        assert!(Cell::Number(f64::NAN).is_null());
    }

    #[test]
    fn numeric_detection_ignores_currency_and_separators() {
        for s in ["100", "$250", "1,200", "-3.5", "€ 12", ".5", " 42 "] {
            assert!(looks_numeric(s), "{s} should be numeric");
        }
        for s in ["", "nan", "12 kg", "Alice", "$", "1.2.3", "--5"] {
            assert!(!looks_numeric(s), "{s} should not be numeric");
        }
        assert!(Cell::Number(3.0).is_numeric());
        assert!(!Cell::Empty.is_numeric());
    }

    #[test]
    fn synthetic_labels_match_extractor_pattern_only() {
        assert!(is_synthetic_label("Unnamed: 0"));
        assert!(is_synthetic_label("Unnamed: 1_level_0"));
        assert!(is_synthetic_label(&ColumnLabel::Synthetic(4).to_string()));
        assert!(!is_synthetic_label("Unnamed Holdings"));
        assert!(!is_synthetic_label("Unnamed"));
    }

    #[test]
    fn number_display_drops_trailing_zero() {
        assert_eq!(Cell::Number(100.0).display(), "100");
        assert_eq!(Cell::Number(2.5).display(), "2.5");
    }

    #[test]
    fn label_from_header() {
        assert_eq!(ColumnLabel::from_header("  Name "), ColumnLabel::Named("Name".into()));
        assert_eq!(ColumnLabel::from_header(""), ColumnLabel::Missing);
        assert_eq!(ColumnLabel::from_header("nan"), ColumnLabel::Missing);
        assert_eq!(ColumnLabel::Synthetic(2).to_string(), "Unnamed: 2");
    }

    #[test]
    fn try_new_rejects_ragged_rows() {
        let err = NormalizedTable::from_strings(&["A", "B"], &[vec!["1"]]).unwrap_err();
        assert!(matches!(err, TableShapeError::Ragged { row: 0, .. }));
    }

    #[test]
    fn try_new_rejects_duplicate_labels() {
        let err = NormalizedTable::from_strings(&["A", "A"], &[vec!["1", "2"]]).unwrap_err();
        assert_eq!(err, TableShapeError::DuplicateLabel("A".into()));
    }

    #[test]
    fn try_new_rejects_empty_column() {
        let err =
            NormalizedTable::from_strings(&["A", "B"], &[vec!["1", ""], vec!["2", " "]]).unwrap_err();
        assert_eq!(err, TableShapeError::EmptyColumn("B".into()));
    }

    #[test]
    fn single_cell_table_is_valid() {
        let t = NormalizedTable::from_strings(&["Col"], &[vec!["X"]]).unwrap();
        assert_eq!(t.row_count(), 1);
        assert_eq!(t.column_count(), 1);
    }
}
