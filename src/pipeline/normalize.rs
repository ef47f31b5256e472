//! Table normalisation: raw [`ExtractedTable`] → rectangular [`NormalizedTable`].
//!
//! ## Rule order
//!
//! 1. Square the table: pad ragged rows, extend short label lists with
//!    synthetic labels, trim cell text, map null markers to empty cells.
//! 2. Flatten multi-level labels by joining their non-empty parts.
//! 3. Infer missing labels from the first data row. Numeric first cells are
//!    data, not headers, and get a `Column_<n>` fallback instead.
//! 4. If any label was promoted, the first row is dropped for the whole
//!    table so rows stay aligned.
//! 5. Drop all-empty rows, then all-empty columns.
//! 6. Make labels unique (`Amount`, `Amount_2`, …).
//!
//! Running an already normalised table back through these rules changes
//! nothing: every label is named, unique and non-synthetic, and there is
//! nothing left to prune.

use crate::table::{is_synthetic_label, Cell, ColumnLabel, ExtractedTable, NormalizedTable};
use std::collections::HashSet;
use tracing::debug;

/// Normalise every table, dropping those with no data left.
///
/// Input order is preserved.
pub fn normalize_all(tables: &[ExtractedTable]) -> Vec<NormalizedTable> {
    tables.iter().filter_map(normalize).collect()
}

/// Normalise one table. `None` if nothing survives pruning.
pub fn normalize(table: &ExtractedTable) -> Option<NormalizedTable> {
    let width = table
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(table.labels.len()))
        .max()
        .unwrap_or(0);
    if width == 0 {
        return None;
    }

    // ── Rule 1: square the table ─────────────────────────────────────────
    let mut rows: Vec<Vec<Cell>> = table
        .rows
        .iter()
        .map(|row| {
            let mut out: Vec<Cell> = row.iter().map(clean_cell).collect();
            out.resize(width, Cell::Empty);
            out
        })
        .collect();

    // ── Rule 2: flatten ──────────────────────────────────────────────────
    let mut labels: Vec<Option<String>> = (0..width)
        .map(|i| match table.labels.get(i) {
            Some(label) => flatten_label(label),
            None => None,
        })
        .collect();

    // ── Rules 3 and 4: header inference ──────────────────────────────────
    let mut promoted = false;
    for (c, label) in labels.iter_mut().enumerate() {
        if label.is_some() {
            continue;
        }
        let candidate = rows.first().map(|r| &r[c]);
        match candidate {
            Some(cell) if !cell.is_null() && !cell.is_numeric() => {
                *label = Some(cell.display());
                promoted = true;
            }
            _ => *label = Some(format!("Column_{}", c + 1)),
        }
    }
    if promoted {
        rows.remove(0);
    }
    let mut labels: Vec<String> = labels.into_iter().flatten().collect();

    // ── Rule 5: prune ────────────────────────────────────────────────────
    rows.retain(|row| !row.iter().all(Cell::is_null));
    let keep: Vec<bool> = (0..width)
        .map(|c| rows.iter().any(|row| !row[c].is_null()))
        .collect();
    if keep.iter().any(|k| !k) {
        labels = retain_columns(labels, &keep);
        rows = rows
            .into_iter()
            .map(|row| retain_columns(row, &keep))
            .collect();
    }

    if rows.is_empty() || labels.is_empty() {
        debug!(
            strategy = %table.strategy,
            pages = ?table.pages,
            "Discarding table with no data after normalisation"
        );
        return None;
    }

    // ── Rule 6: unique labels ────────────────────────────────────────────
    let labels = dedupe_labels(labels);

    match NormalizedTable::try_new(labels, rows) {
        Ok(t) => Some(t),
        Err(e) => {
            debug!(error = %e, "Discarding malformed table");
            None
        }
    }
}

fn clean_cell(cell: &Cell) -> Cell {
    match cell {
        c if c.is_null() => Cell::Empty,
        Cell::Text(s) => Cell::text(s),
        other => other.clone(),
    }
}

fn is_placeholder(s: &str) -> bool {
    let t = s.trim();
    Cell::text(t).is_null() || is_synthetic_label(t)
}

/// Resolved label text, or `None` when the label has to be inferred.
fn flatten_label(label: &ColumnLabel) -> Option<String> {
    match label {
        ColumnLabel::Named(s) if !is_placeholder(s) => Some(s.trim().to_string()),
        ColumnLabel::Named(_) | ColumnLabel::Synthetic(_) | ColumnLabel::Missing => None,
        ColumnLabel::MultiLevel(parts) => {
            let joined = parts
                .iter()
                .map(|p| p.trim())
                .filter(|p| !is_placeholder(p))
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                None
            } else {
                Some(joined)
            }
        }
    }
}

fn retain_columns<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, &k)| k.then_some(item))
        .collect()
}

fn dedupe_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(labels.len());
    labels
        .into_iter()
        .map(|label| {
            let mut candidate = label.clone();
            let mut n = 2;
            while seen.contains(&candidate) {
                candidate = format!("{label}_{n}");
                n += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}
