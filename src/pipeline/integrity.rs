//! Integrity gate: is this upload a readable, non-empty PDF?
//!
//! Runs before any extraction or conversion so a corrupt upload costs one
//! cheap probe instead of a full layout pass. Two stages:
//!
//! 1. Structural: the file is non-empty, starts with a `%PDF-` header
//!    within the first KiB and ends with a `%%EOF` marker within the last
//!    KiB. Truncated uploads fail here without touching pdfium.
//! 2. Engine probe: the document opens, has at least one page, and the
//!    first page's text layer decodes (an image-only page decodes to
//!    nothing, which is fine).
//!
//! The check is read-only. A failure to bind the engine itself is not a
//! verdict on the file and comes back as `Err` instead of an invalid report.

use crate::engine::PdfEngine;
use crate::error::EngineError;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

const WINDOW: u64 = 1024;

/// Outcome of [`check`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub valid: bool,
    /// Human-readable reason, suitable for showing to the uploader.
    pub reason: String,
    /// Page count reported by the engine; 0 when the check failed early.
    pub page_count: usize,
}

impl IntegrityReport {
    fn ok(page_count: usize) -> Self {
        Self {
            valid: true,
            reason: "Valid PDF file".into(),
            page_count,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            page_count: 0,
        }
    }

    fn corrupted(detail: impl std::fmt::Display) -> Self {
        Self::invalid(format!("Invalid or corrupted PDF file: {detail}"))
    }
}

/// Validate the PDF at `path`. Blocking.
///
/// Returns `Err` only when the engine is unavailable
/// ([`EngineError::Binding`]); every problem with the file itself is an
/// invalid report.
pub fn check(engine: &dyn PdfEngine, path: &Path) -> Result<IntegrityReport, EngineError> {
    if let Err(detail) = check_structure(path) {
        warn!("PDF validation error for {}: {detail}", path.display());
        return Ok(IntegrityReport::corrupted(detail));
    }

    match engine.probe(path) {
        Ok(probe) if probe.page_count == 0 => {
            Ok(IntegrityReport::invalid("PDF file appears to be empty"))
        }
        Ok(probe) => {
            debug!(
                pages = probe.page_count,
                first_page_chars = probe.first_page_chars,
                "PDF passed integrity check"
            );
            Ok(IntegrityReport::ok(probe.page_count))
        }
        Err(e @ EngineError::Binding(_)) => Err(e),
        Err(e) => {
            warn!("PDF validation error for {}: {e}", path.display());
            Ok(IntegrityReport::corrupted(e))
        }
    }
}

/// Header and trailer markers.
fn check_structure(path: &Path) -> Result<(), String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let len = file.metadata().map_err(|e| e.to_string())?.len();
    if len == 0 {
        return Err("Cannot read an empty file".into());
    }

    let mut head = Vec::with_capacity(WINDOW as usize);
    (&mut file)
        .take(WINDOW)
        .read_to_end(&mut head)
        .map_err(|e| e.to_string())?;
    if !contains(&head, b"%PDF-") {
        return Err("missing %PDF header".into());
    }

    file.seek(SeekFrom::Start(len.saturating_sub(WINDOW)))
        .map_err(|e| e.to_string())?;
    let mut tail = Vec::with_capacity(WINDOW as usize);
    file.read_to_end(&mut tail).map_err(|e| e.to_string())?;
    if !contains(&tail, b"%%EOF") {
        return Err("missing %%EOF marker, the file may be truncated".into());
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PageLayout, PdfProbe};

    struct FixedProbe(Result<PdfProbe, EngineError>);

    impl PdfEngine for FixedProbe {
        fn probe(&self, _: &Path) -> Result<PdfProbe, EngineError> {
            self.0.clone()
        }
        fn layout(&self, _: &Path) -> Result<Vec<PageLayout>, EngineError> {
            Ok(vec![])
        }
    }

    fn pages(n: usize) -> FixedProbe {
        FixedProbe(Ok(PdfProbe {
            page_count: n,
            first_page_chars: 10,
        }))
    }

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    const MINIMAL: &[u8] = b"%PDF-1.4\n1 0 obj<<>>endobj\ntrailer<<>>\n%%EOF\n";

    #[test]
    fn test_valid_pdf_passes() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "ok.pdf", MINIMAL);
        let r = check(&pages(3), &p).unwrap();
        assert!(r.valid);
        assert_eq!(r.page_count, 3);
    }

    #[test]
    fn test_truncated_pdf_fails_before_engine() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "cut.pdf", &MINIMAL[..20]);
        let r = check(&pages(3), &p).unwrap();
        assert!(!r.valid);
        assert!(r.reason.starts_with("Invalid or corrupted PDF file:"), "{}", r.reason);
        assert!(r.reason.contains("truncated"));
    }

    #[test]
    fn test_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "empty.pdf", b"");
        assert!(!check(&pages(1), &p).unwrap().valid);
    }

    #[test]
    fn test_not_a_pdf_fails() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "fake.pdf", b"<html>hello</html>");
        let r = check(&pages(1), &p).unwrap();
        assert!(r.reason.contains("%PDF"));
    }

    #[test]
    fn test_zero_pages_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "zero.pdf", MINIMAL);
        let r = check(&pages(0), &p).unwrap();
        assert!(!r.valid);
        assert_eq!(r.reason, "PDF file appears to be empty");
    }

    #[test]
    fn test_engine_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "locked.pdf", MINIMAL);
        let r = check(&FixedProbe(Err(EngineError::PasswordRequired)), &p).unwrap();
        assert!(!r.valid);
        assert!(r.reason.contains("password"), "{}", r.reason);
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let r = check(&pages(1), Path::new("/nonexistent/really.pdf")).unwrap();
        assert!(!r.valid);
    }

    #[test]
    fn test_unbindable_engine_is_not_a_file_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "ok.pdf", MINIMAL);
        let engine = FixedProbe(Err(EngineError::Binding("libpdfium.so: not found".into())));
        assert!(matches!(check(&engine, &p), Err(EngineError::Binding(_))));
    }
}
