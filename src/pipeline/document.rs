//! Document converter: PDF → `.docx`.
//!
//! The page-by-page reconstruction is delegated to a [`DocumentTransformer`].
//! This module owns what surrounds it:
//!
//! - **pre-checks**: the source exists and is non-empty;
//! - **post-checks**: the destination exists, is non-empty and is a zip
//!   package holding the minimal WordprocessingML manifest parts;
//! - **failure translation**: raw transformer text goes through
//!   [`classify_transform_failure`] and nowhere else.
//!
//! [`LayoutDocxTransformer`] is the built-in transformer: it rebuilds the
//! text lines of each page from the engine layout, one paragraph per line,
//! with a page break between pages. Pages are processed sequentially on the
//! calling thread.

use crate::engine::{PageLayout, PdfEngine};
use crate::error::{ConversionFailure, ConvertError, EngineError};
use crate::pipeline::layout::group_lines;
use crate::pipeline::ooxml::{
    escape_text, missing_parts, PackageWriter, CONTENT_TYPES_PART, CORE_PROPS_PART,
    PACKAGE_RELS_PART, XML_DECL,
};
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Parts every `.docx` must contain.
pub const DOCX_REQUIRED_PARTS: [&str; 3] =
    [CONTENT_TYPES_PART, PACKAGE_RELS_PART, "word/document.xml"];

/// Raw failure text from a transformer. Never shown to users as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct TransformFailure(pub String);

impl From<EngineError> for TransformFailure {
    fn from(e: EngineError) -> Self {
        TransformFailure(e.to_string())
    }
}

impl From<io::Error> for TransformFailure {
    fn from(e: io::Error) -> Self {
        TransformFailure(e.to_string())
    }
}

/// PDF → word-processing document capability.
pub trait DocumentTransformer: Send + Sync {
    /// Write a `.docx` rendition of `pdf` to `dest`. Blocking.
    fn transform(&self, pdf: &Path, dest: &Path) -> Result<(), TransformFailure>;
}

/// Map raw transformer failure text onto the sanitised taxonomy.
pub fn classify_transform_failure(raw: &str) -> ConversionFailure {
    let lower = raw.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let detail = raw.to_string();

    if has(&[
        "no module named",
        "not installed",
        "failed to bind",
        "library not found",
        "cannot open shared object",
        "dlopen",
    ]) {
        ConversionFailure::MissingDependency { detail }
    } else if has(&["permission denied", "access is denied", "os error 13"]) {
        ConversionFailure::PermissionDenied { detail }
    } else if has(&["out of memory", "memoryerror", "cannot allocate", "memory allocation"]) {
        ConversionFailure::OutOfMemory { detail }
    } else if has(&["invalid zip", "malformed", "bad zip"]) {
        ConversionFailure::MalformedOutput { detail }
    } else {
        ConversionFailure::Generic { detail }
    }
}

/// Run `transformer` on `pdf`, writing `dest`, with pre- and post-checks.
///
/// Blocking; async callers go through `spawn_blocking`. On failure `dest`
/// may hold a partial file and the caller removes it.
pub fn convert_document(
    transformer: &dyn DocumentTransformer,
    pdf: &Path,
    dest: &Path,
) -> Result<(), ConvertError> {
    match std::fs::metadata(pdf) {
        Ok(m) if m.len() > 0 => {}
        Ok(_) => {
            return Err(ConvertError::InvalidSource {
                path: pdf.to_path_buf(),
                reason: "PDF file appears to be empty".into(),
            })
        }
        Err(e) => return Err(ConvertError::storage("read", pdf, e)),
    }

    info!("Starting conversion: {} -> {}", pdf.display(), dest.display());
    if let Err(failure) = transformer.transform(pdf, dest) {
        let classified = classify_transform_failure(&failure.0);
        error!(kind = ?classified, "Conversion error: {}", failure.0);
        return Err(classified.into());
    }

    verify_docx(dest)?;
    info!("Conversion completed successfully: {}", dest.display());
    Ok(())
}

/// Post-check on a produced `.docx`.
fn verify_docx(dest: &Path) -> Result<(), ConversionFailure> {
    let malformed = |detail: String| {
        warn!("Malformed conversion output {}: {detail}", dest.display());
        ConversionFailure::MalformedOutput { detail }
    };

    let len = std::fs::metadata(dest)
        .map_err(|e| malformed(format!("output missing: {e}")))?
        .len();
    if len == 0 {
        return Err(malformed("output is empty".into()));
    }
    let missing = missing_parts(dest, &DOCX_REQUIRED_PARTS)
        .map_err(|e| malformed(format!("output is not a zip package: {e}")))?;
    if !missing.is_empty() {
        return Err(malformed(format!("missing parts: {}", missing.join(", "))));
    }
    Ok(())
}

// ── Built-in transformer ─────────────────────────────────────────────────

/// Rebuilds plain text flow from the engine's page layouts.
pub struct LayoutDocxTransformer {
    engine: Arc<dyn PdfEngine>,
    line_tolerance: f32,
    tab_gap: f32,
}

impl LayoutDocxTransformer {
    pub fn new(engine: Arc<dyn PdfEngine>) -> Self {
        Self {
            engine,
            line_tolerance: 2.0,
            tab_gap: 18.0,
        }
    }

    /// Gap, in points, at which two runs on a line are separated by a tab.
    pub fn with_tab_gap(mut self, gap: f32) -> Self {
        self.tab_gap = gap;
        self
    }

    fn body_xml(&self, pages: &[PageLayout]) -> String {
        let mut body = String::new();
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                body.push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#);
            }
            let lines = group_lines(&page.runs, self.line_tolerance);
            let mut prev_bottom: Option<f32> = None;
            for line in &lines {
                // A gap taller than a line reads as a paragraph break.
                if let Some(bottom) = prev_bottom {
                    if line.bbox.top - bottom > line.bbox.height() {
                        body.push_str("<w:p/>");
                    }
                }
                prev_bottom = Some(line.bbox.bottom);
                push_paragraph(&mut body, &line.text(self.tab_gap));
            }
        }
        if body.is_empty() {
            body.push_str("<w:p/>");
        }
        body
    }
}

fn push_paragraph(body: &mut String, text: &str) {
    body.push_str("<w:p><w:r>");
    for (i, segment) in text.split('\t').enumerate() {
        if i > 0 {
            body.push_str("<w:tab/>");
        }
        if !segment.is_empty() {
            body.push_str(&format!(
                r#"<w:t xml:space="preserve">{}</w:t>"#,
                escape_text(segment)
            ));
        }
    }
    body.push_str("</w:r></w:p>");
}

/// `<w:sectPr>` sized to `page` (points → twentieths of a point).
fn section_xml(page: Option<&PageLayout>) -> String {
    let (w, h) = page
        .filter(|p| p.width > 0.0 && p.height > 0.0)
        .map(|p| ((p.width * 20.0).round() as u32, (p.height * 20.0).round() as u32))
        .unwrap_or((12240, 15840));
    format!(
        r#"<w:sectPr><w:pgSz w:w="{w}" w:h="{h}"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="720" w:footer="720" w:gutter="0"/></w:sectPr>"#
    )
}

impl DocumentTransformer for LayoutDocxTransformer {
    fn transform(&self, pdf: &Path, dest: &Path) -> Result<(), TransformFailure> {
        let pages = self.engine.layout(pdf)?;

        let document = format!(
            r#"{XML_DECL}
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}{}</w:body></w:document>"#,
            self.body_xml(&pages),
            section_xml(pages.first())
        );
        let content_types = format!(
            r#"{XML_DECL}
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/{CORE_PROPS_PART}" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#
        );

        let title = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut pkg = PackageWriter::create(dest)?;
        pkg.add_part(CONTENT_TYPES_PART, &content_types)?;
        pkg.add_package_parts("word/document.xml", &title)?;
        pkg.add_part("word/document.xml", &document)?;
        pkg.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BBox, PdfProbe, TextRun};
    use std::io::Read;

    struct Pages(Vec<PageLayout>);

    impl PdfEngine for Pages {
        fn probe(&self, _: &Path) -> Result<PdfProbe, EngineError> {
            Ok(PdfProbe {
                page_count: self.0.len(),
                first_page_chars: 0,
            })
        }
        fn layout(&self, _: &Path) -> Result<Vec<PageLayout>, EngineError> {
            Ok(self.0.clone())
        }
    }

    struct Failing(&'static str);

    impl DocumentTransformer for Failing {
        fn transform(&self, _: &Path, _: &Path) -> Result<(), TransformFailure> {
            Err(TransformFailure(self.0.into()))
        }
    }

    struct WritesBytes(&'static [u8]);

    impl DocumentTransformer for WritesBytes {
        fn transform(&self, _: &Path, dest: &Path) -> Result<(), TransformFailure> {
            std::fs::write(dest, self.0)?;
            Ok(())
        }
    }

    fn page(num: usize, lines: &[&str]) -> PageLayout {
        PageLayout {
            page_num: num,
            width: 612.0,
            height: 792.0,
            runs: lines
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let top = 72.0 + 14.0 * i as f32;
                    TextRun::new(*t, BBox::new(72.0, top, 300.0, top + 12.0))
                })
                .collect(),
            rulings: vec![],
        }
    }

    fn source(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let p = dir.path().join("in.pdf");
        std::fs::write(&p, b"%PDF-1.4\n%%EOF\n").unwrap();
        p
    }

    fn document_xml(path: &Path) -> String {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn test_layout_transformer_writes_valid_docx() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = source(&dir);
        let dest = dir.path().join("out.docx");
        let t = LayoutDocxTransformer::new(Arc::new(Pages(vec![
            page(1, &["Quarterly report", "Sales & costs"]),
            page(2, &["Appendix"]),
        ])));

        convert_document(&t, &pdf, &dest).unwrap();
        let xml = document_xml(&dest);
        assert!(xml.contains("Quarterly report"));
        assert!(xml.contains("Sales &amp; costs"));
        assert_eq!(xml.matches(r#"w:type="page""#).count(), 1);
        assert!(xml.contains(r#"w:w="12240""#));
    }

    #[test]
    fn test_empty_layout_still_produces_document() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = source(&dir);
        let dest = dir.path().join("blank.docx");
        let t = LayoutDocxTransformer::new(Arc::new(Pages(vec![page(1, &[])])));
        convert_document(&t, &pdf, &dest).unwrap();
        assert!(document_xml(&dest).contains("<w:p/>"));
    }

    #[test]
    fn test_tabs_between_wide_gaps() {
        let mut body = String::new();
        push_paragraph(&mut body, "Name\tAmount");
        assert_eq!(
            body,
            r#"<w:p><w:r><w:t xml:space="preserve">Name</w:t><w:tab/><w:t xml:space="preserve">Amount</w:t></w:r></w:p>"#
        );
    }

    #[test]
    fn test_transformer_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = source(&dir);
        let dest = dir.path().join("out.docx");
        let err = convert_document(
            &Failing("[Errno 13] Permission denied: '/converted/out.docx'"),
            &pdf,
            &dest,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Conversion(ConversionFailure::PermissionDenied { .. })
        ));
        assert!(!err.user_message().contains("/converted"));
    }

    #[test]
    fn test_non_zip_output_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = source(&dir);
        let dest = dir.path().join("out.docx");
        let err = convert_document(&WritesBytes(b"not a zip"), &pdf, &dest).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Conversion(ConversionFailure::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_empty_output_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = source(&dir);
        let dest = dir.path().join("out.docx");
        let err = convert_document(&WritesBytes(b""), &pdf, &dest).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Conversion(ConversionFailure::MalformedOutput { .. })
        ));
    }

    #[test]
    fn test_empty_source_rejected_before_transform() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("empty.pdf");
        std::fs::write(&pdf, b"").unwrap();
        let err = convert_document(&Failing("unreachable"), &pdf, &dir.path().join("x.docx"))
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidSource { .. }));
    }

    #[test]
    fn test_classification_buckets() {
        assert!(matches!(
            classify_transform_failure("Failed to bind to pdfium library: libpdfium.so"),
            ConversionFailure::MissingDependency { .. }
        ));
        assert!(matches!(
            classify_transform_failure("ModuleNotFoundError: No module named 'fitz'"),
            ConversionFailure::MissingDependency { .. }
        ));
        assert!(matches!(
            classify_transform_failure("MemoryError"),
            ConversionFailure::OutOfMemory { .. }
        ));
        assert!(matches!(
            classify_transform_failure("page 3: unexpected token"),
            ConversionFailure::Generic { .. }
        ));
    }
}
