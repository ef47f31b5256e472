//! PDF engine seam: everything the pipeline needs to know about a PDF.
//!
//! The pipeline never talks to pdfium directly. It asks a [`PdfEngine`] for
//! a cheap [`PdfProbe`] (integrity gate) or for the positioned text and
//! ruling lines of every page ([`PageLayout`], extraction and document
//! reconstruction). [`PdfiumEngine`] is the production implementation;
//! tests plug in synthetic layouts through the same trait.
//!
//! ## Why blocking?
//!
//! pdfium keeps thread-local state and is not async-safe. Engine methods
//! are plain blocking calls; async callers wrap them in
//! `tokio::task::spawn_blocking`.

use crate::error::EngineError;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Axis-aligned box in PDF points, measured from the top-left corner of the
/// page (`top < bottom`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn new(x0: f32, top: f32, x1: f32, bottom: f32) -> Self {
        Self {
            x0: x0.min(x1),
            top: top.min(bottom),
            x1: x0.max(x1),
            bottom: top.max(bottom),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.top + self.bottom) / 2.0)
    }

    /// True if the boxes overlap once each is grown by `pad` on every side.
    pub fn touches(&self, other: &BBox, pad: f32) -> bool {
        self.x0 - pad <= other.x1
            && other.x0 - pad <= self.x1
            && self.top - pad <= other.bottom
            && other.top - pad <= self.bottom
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            top: self.top.min(other.top),
            x1: self.x1.max(other.x1),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

/// A run of text on one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub bbox: BBox,
}

impl TextRun {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// Bounding box of a vector path object: a stroked line or a thin/outlined
/// rectangle. Table grids are rebuilt from these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ruling {
    pub bbox: BBox,
}

/// Positioned content of one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    /// 1-indexed page number.
    pub page_num: usize,
    pub width: f32,
    pub height: f32,
    pub runs: Vec<TextRun>,
    pub rulings: Vec<Ruling>,
}

/// Result of the cheap open-and-peek probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfProbe {
    pub page_count: usize,
    /// Characters decoded from the first page's text layer (0 for
    /// image-only pages; the decode itself must still succeed).
    pub first_page_chars: usize,
}

/// Read-only access to PDF structure.
pub trait PdfEngine: Send + Sync {
    /// Open the document, count pages and decode the first page's text.
    fn probe(&self, path: &Path) -> Result<PdfProbe, EngineError>;

    /// Positioned text and rulings of every page, in page order.
    fn layout(&self, path: &Path) -> Result<Vec<PageLayout>, EngineError>;
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`PdfEngine`] backed by Google PDFium through `pdfium-render`.
///
/// Stateless: a `Pdfium` handle is bound per operation. The OS caches the
/// `dlopen`, so repeat binds cost next to nothing.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the pdfium library at `path` instead of searching for it.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// User password for encrypted documents.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Check that a pdfium library can be bound at all.
    pub fn verify(&self) -> Result<(), EngineError> {
        self.bind().map(|_| ())
    }

    /// Bind the pdfium shared library.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var
    /// 2. the path given to [`PdfiumEngine::with_library_path`]
    /// 3. next to the running executable
    /// 4. system library search paths
    fn bind(&self) -> Result<Pdfium, EngineError> {
        if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
            debug!(path = %path, "Binding pdfium from env var");
            let bindings = Pdfium::bind_to_library(&path)
                .map_err(|e| EngineError::Binding(format!("{path}: {e}")))?;
            return Ok(Pdfium::new(bindings));
        }

        if let Some(ref path) = self.library_path {
            let bindings = Pdfium::bind_to_library(path)
                .map_err(|e| EngineError::Binding(format!("{}: {e}", path.display())))?;
            return Ok(Pdfium::new(bindings));
        }

        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let lib = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
                debug!(dir = %dir.display(), "Bound pdfium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }

        let bindings = Pdfium::bind_to_system_library().map_err(|e| {
            EngineError::Binding(format!(
                "pdfium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install pdfium: {e}"
            ))
        })?;
        Ok(Pdfium::new(bindings))
    }
}

/// Map a document load error, singling out encrypted documents.
fn map_load_error(e: PdfiumError) -> EngineError {
    let msg = format!("{e:?}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        EngineError::PasswordRequired
    } else {
        EngineError::Load { detail: msg }
    }
}

/// Convert a pdfium rectangle (origin bottom-left) to a top-left [`BBox`].
fn to_bbox(rect: &PdfRect, page_height: f32) -> BBox {
    BBox::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

impl PdfEngine for PdfiumEngine {
    fn probe(&self, path: &Path) -> Result<PdfProbe, EngineError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(map_load_error)?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Ok(PdfProbe {
                page_count,
                first_page_chars: 0,
            });
        }

        let first = pages.get(0).map_err(|e| EngineError::Page {
            page: 1,
            detail: format!("{e:?}"),
        })?;
        let text = first.text().map_err(|e| EngineError::Page {
            page: 1,
            detail: format!("text layer: {e:?}"),
        })?;
        let first_page_chars = text.all().chars().count();

        debug!(page_count, first_page_chars, "Probed {}", path.display());
        Ok(PdfProbe {
            page_count,
            first_page_chars,
        })
    }

    fn layout(&self, path: &Path) -> Result<Vec<PageLayout>, EngineError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(map_load_error)?;

        let mut layouts = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let page_num = idx + 1;
            let width = page.width().value;
            let height = page.height().value;

            let text = page.text().map_err(|e| EngineError::Page {
                page: page_num,
                detail: format!("text layer: {e:?}"),
            })?;
            let runs: Vec<TextRun> = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let s = segment.text();
                    if s.trim().is_empty() {
                        None
                    } else {
                        Some(TextRun::new(s, to_bbox(&segment.bounds(), height)))
                    }
                })
                .collect();

            let rulings: Vec<Ruling> = page
                .objects()
                .iter()
                .filter(|object| object.object_type() == PdfPageObjectType::Path)
                .filter_map(|object| object.bounds().ok())
                .map(|quad| Ruling {
                    bbox: to_bbox(&quad.to_rect(), height),
                })
                .collect();

            debug!(
                page_num,
                runs = runs.len(),
                rulings = rulings.len(),
                "Read page layout"
            );
            layouts.push(PageLayout {
                page_num,
                width,
                height,
                runs,
                rulings,
            });
        }

        info!("Read layout of {} pages from {}", layouts.len(), path.display());
        Ok(layouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_normalises_corners() {
        let b = BBox::new(10.0, 50.0, 0.0, 20.0);
        assert_eq!(b.x0, 0.0);
        assert_eq!(b.x1, 10.0);
        assert_eq!(b.top, 20.0);
        assert_eq!(b.bottom, 50.0);
        assert_eq!(b.width(), 10.0);
        assert_eq!(b.height(), 30.0);
    }

    #[test]
    fn bbox_touches_with_padding() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(11.0, 0.0, 20.0, 10.0);
        assert!(!a.touches(&b, 0.5));
        assert!(a.touches(&b, 1.5));
        assert_eq!(a.union(&b), BBox::new(0.0, 0.0, 20.0, 10.0));
    }
}
