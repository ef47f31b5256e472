//! Path-to-path conversion entry points.
//!
//! These are the blocking building blocks the lifecycle manager runs inside
//! `spawn_blocking`; they can also be called directly when the caller owns
//! both files and needs none of the upload/expiry machinery.
//!
//! ```text
//! spreadsheet:  layout ─▶ extraction ladder ─▶ normalizer ─▶ workbook
//! document:     transformer ─▶ package post-check
//! ```
//!
//! ## Why write through a temp file?
//!
//! Output is produced under a `.partial-*` name in the destination folder
//! and renamed into place only once it is complete and verified. A failed
//! conversion therefore never leaves a half-written artifact behind under
//! its real name: the temp file is removed when it goes out of scope.

use crate::engine::PdfEngine;
use crate::error::ConvertError;
use crate::pipeline::document::{classify_transform_failure, convert_document, DocumentTransformer};
use crate::pipeline::extract::{extract_tables, ExtractionOptions};
use crate::pipeline::integrity::{self, IntegrityReport};
use crate::pipeline::normalize::normalize_all;
use crate::pipeline::spreadsheet;
use crate::table::StrategyId;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of a spreadsheet conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadsheetOutcome {
    /// Winning extraction strategy, if any.
    pub strategy: Option<StrategyId>,
    /// Tables that survived normalisation.
    pub tables: usize,
    /// Worksheets written.
    pub sheets: usize,
    /// True if the workbook holds only the "no tabular data" sheet.
    pub placeholder: bool,
}

impl SpreadsheetOutcome {
    /// One-line description for the uploader.
    pub fn message(&self) -> String {
        match (self.placeholder, self.tables) {
            (true, _) => "No tabular data found in the PDF. The document may be image-only \
                          (scanned) or contain only prose; the spreadsheet holds a note instead."
                .into(),
            (false, 1) => "Conversion completed successfully: 1 table extracted".into(),
            (false, n) => format!("Conversion completed successfully: {n} tables extracted"),
        }
    }
}

/// Extract, normalise and render the tables of `pdf` into `dest`. Blocking.
///
/// With `placeholder_on_empty` set, a PDF without tables still yields a
/// workbook holding one explanatory row; otherwise it fails with
/// [`ConvertError::ExtractionEmpty`].
pub fn convert_to_spreadsheet(
    engine: &dyn PdfEngine,
    pdf: &Path,
    dest: &Path,
    options: ExtractionOptions,
    placeholder_on_empty: bool,
) -> Result<SpreadsheetOutcome, ConvertError> {
    let report = extract_tables(engine, pdf, options)
        .map_err(|e| ConvertError::from(classify_transform_failure(&e.to_string())))?;
    let tables = normalize_all(&report.tables);

    if tables.is_empty() {
        if report.strategy.is_some() {
            warn!(
                "{} table(s) extracted from {} but none survived normalisation",
                report.tables.len(),
                pdf.display()
            );
        }
        if !placeholder_on_empty {
            return Err(ConvertError::ExtractionEmpty);
        }
    }

    let sheets = write_atomically(dest, |tmp| {
        spreadsheet::render(&tables, tmp).map_err(|e| ConvertError::storage("write", dest, e))
    })?;

    Ok(SpreadsheetOutcome {
        strategy: report.strategy,
        tables: tables.len(),
        sheets,
        placeholder: tables.is_empty(),
    })
}

/// Run `transformer` on `pdf` and move the verified `.docx` to `dest`. Blocking.
pub fn convert_to_document(
    transformer: &dyn DocumentTransformer,
    pdf: &Path,
    dest: &Path,
) -> Result<(), ConvertError> {
    write_atomically(dest, |tmp| convert_document(transformer, pdf, tmp))
}

/// Integrity check plus extraction dry run, writing nothing.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub integrity: IntegrityReport,
    pub strategy: Option<StrategyId>,
    pub tables: usize,
    /// `(rows, columns)` of each normalised table.
    pub shapes: Vec<(usize, usize)>,
}

/// Check `pdf` and report what a spreadsheet conversion would find.
pub async fn inspect(
    engine: Arc<dyn PdfEngine>,
    pdf: impl AsRef<Path>,
    options: ExtractionOptions,
) -> Result<InspectReport, ConvertError> {
    let pdf = pdf.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || {
        let integrity = integrity::check(engine.as_ref(), &pdf)
            .map_err(|e| ConvertError::from(classify_transform_failure(&e.to_string())))?;
        if !integrity.valid {
            return Ok(InspectReport {
                integrity,
                strategy: None,
                tables: 0,
                shapes: vec![],
            });
        }
        let report = extract_tables(engine.as_ref(), &pdf, options)
            .map_err(|e| ConvertError::from(classify_transform_failure(&e.to_string())))?;
        let tables = normalize_all(&report.tables);
        Ok(InspectReport {
            integrity,
            strategy: report.strategy,
            tables: tables.len(),
            shapes: tables
                .iter()
                .map(|t| (t.row_count(), t.column_count()))
                .collect(),
        })
    })
    .await
    .map_err(|e| ConvertError::Internal(format!("inspect task panicked: {e}")))?
}

/// Produce `dest` through a temp file in the same folder.
fn write_atomically<T>(
    dest: &Path,
    write: impl FnOnce(&Path) -> Result<T, ConvertError>,
) -> Result<T, ConvertError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| ConvertError::storage("create", dir, e))?;

    let out = write(tmp.path())?;
    tmp.persist(dest)
        .map_err(|e| ConvertError::storage("rename", dest, e.error))?;
    info!("Wrote {}", dest.display());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BBox, PageLayout, PdfProbe, Ruling, TextRun};
    use crate::error::{EngineError, ErrorKind};

    struct Fixed(Vec<PageLayout>);

    impl PdfEngine for Fixed {
        fn probe(&self, _: &Path) -> Result<PdfProbe, EngineError> {
            Ok(PdfProbe {
                page_count: self.0.len(),
                first_page_chars: 1,
            })
        }
        fn layout(&self, _: &Path) -> Result<Vec<PageLayout>, EngineError> {
            Ok(self.0.clone())
        }
    }

    fn prose() -> PageLayout {
        PageLayout {
            page_num: 1,
            width: 612.0,
            height: 792.0,
            runs: vec![TextRun::new(
                "Just a paragraph of prose.",
                BBox::new(72.0, 72.0, 300.0, 84.0),
            )],
            rulings: vec![],
        }
    }

    fn grid() -> PageLayout {
        let mut rulings = Vec::new();
        for y in [100.0, 120.0, 140.0] {
            rulings.push(Ruling { bbox: BBox::new(50.0, y, 250.0, y) });
        }
        for x in [50.0, 150.0, 250.0] {
            rulings.push(Ruling { bbox: BBox::new(x, 100.0, x, 140.0) });
        }
        PageLayout {
            page_num: 1,
            width: 612.0,
            height: 792.0,
            runs: vec![
                TextRun::new("Name", BBox::new(60.0, 105.0, 90.0, 115.0)),
                TextRun::new("Amount", BBox::new(160.0, 105.0, 200.0, 115.0)),
                TextRun::new("Alice", BBox::new(60.0, 125.0, 90.0, 135.0)),
                TextRun::new("100", BBox::new(160.0, 125.0, 180.0, 135.0)),
            ],
            rulings,
        }
    }

    fn pdf(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let p = dir.path().join("in.pdf");
        std::fs::write(&p, b"%PDF-1.4\n%%EOF\n").unwrap();
        p
    }

    #[test]
    fn test_spreadsheet_from_grid() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.xlsx");
        let outcome = convert_to_spreadsheet(
            &Fixed(vec![grid()]),
            &pdf(&dir),
            &dest,
            ExtractionOptions::default(),
            true,
        )
        .unwrap();
        assert_eq!(outcome.strategy, Some(StrategyId::LatticeSingleHeader));
        assert_eq!(outcome.tables, 1);
        assert!(!outcome.placeholder);
        assert!(dest.exists());
    }

    #[test]
    fn test_prose_gets_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.xlsx");
        let outcome = convert_to_spreadsheet(
            &Fixed(vec![prose()]),
            &pdf(&dir),
            &dest,
            ExtractionOptions::default(),
            true,
        )
        .unwrap();
        assert!(outcome.placeholder);
        assert_eq!(outcome.sheets, 1);
        assert!(outcome.message().contains("No tabular data"));
    }

    #[test]
    fn test_prose_without_placeholder_is_extraction_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.xlsx");
        let err = convert_to_spreadsheet(
            &Fixed(vec![prose()]),
            &pdf(&dir),
            &dest,
            ExtractionOptions::default(),
            false,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionEmpty);
        assert!(!dest.exists());
    }

    #[test]
    fn test_failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.docx");
        let err = write_atomically(&dest, |tmp| {
            std::fs::write(tmp, b"half").unwrap();
            Err::<(), _>(ConvertError::Internal("boom".into()))
        })
        .unwrap_err();
        assert!(matches!(err, ConvertError::Internal(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_inspect_reports_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let report = inspect(
            Arc::new(Fixed(vec![grid()])),
            pdf(&dir),
            ExtractionOptions::default(),
        )
        .await
        .unwrap();
        assert!(report.integrity.valid);
        assert_eq!(report.shapes, vec![(1, 2)]);
    }
}
