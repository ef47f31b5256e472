//! # pdfconv
//!
//! Convert uploaded PDF documents to Word (`.docx`) or Excel (`.xlsx`)
//! files, and make sure nothing is left on disk afterwards.
//!
//! ## Why this crate?
//!
//! Turning a PDF into an editable document is mostly plumbing; turning it
//! into a spreadsheet is not. Tables in PDFs are either drawn with ruling
//! lines or merely aligned with whitespace, headers may span two rows or be
//! missing altogether, and extraction produces ragged, half-empty blocks.
//! This crate tries several extraction strategies in a fixed order, cleans
//! up whatever the first successful one finds, and writes one styled sheet
//! per table. Around that sits a small lifecycle manager that stores the
//! upload, converts it, hands out the result exactly once and purges
//! everything on a timer.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload bytes
//!  │
//!  ├─ 1. Boundary   name, extension and size checks (nothing written yet)
//!  ├─ 2. Store      <uuid>_<sanitised name>.pdf in the upload folder
//!  ├─ 3. Integrity  %PDF-/%%EOF markers, page count, first-page text
//!  ├─ 4. Convert    .docx: transformer + package post-check
//!  │                .xlsx: extraction ladder → normalizer → workbook
//!  ├─ 5. Register   artifact id, unclaimed-TTL purge timer
//!  └─ 6. Deliver    stream once, then delete (immediately or after a grace)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfconv::{ArtifactManager, ConversionResult, OutputKind, PdfiumEngine, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ArtifactManager::new(ServiceConfig::default(), Arc::new(PdfiumEngine::new()))?;
//!     let bytes = std::fs::read("statement.pdf")?;
//!
//!     match manager.submit(&bytes, "statement.pdf", OutputKind::Spreadsheet).await {
//!         ConversionResult::Success { artifact_id, download_name, .. } => {
//!             let delivery = manager.fetch(artifact_id.as_str()).await?;
//!             let mut out = tokio::fs::File::create(&download_name).await?;
//!             delivery.stream_to(&mut out).await?;
//!         }
//!         ConversionResult::Failure { kind, message } => eprintln!("{kind}: {message}"),
//!     }
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfconv = { version = "0.3", default-features = false }
//! ```
//!
//! ## pdfium
//!
//! [`PdfiumEngine`] binds the pdfium shared library at runtime. Set
//! `PDFIUM_DYNAMIC_LIB_PATH`, place the library next to the executable, or
//! install it system-wide. Anything implementing [`PdfEngine`] can stand in
//! for it.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod purge;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DeliveryMode, OutputKind, ServiceConfig, ServiceConfigBuilder};
pub use convert::{convert_to_document, convert_to_spreadsheet, inspect, InspectReport, SpreadsheetOutcome};
pub use engine::{BBox, PageLayout, PdfEngine, PdfProbe, PdfiumEngine, Ruling, TextRun};
pub use error::{ConversionFailure, ConvertError, EngineError, ErrorKind, FetchError};
pub use lifecycle::{ArtifactId, ArtifactManager, ConversionResult, Delivery, RequestState};
pub use pipeline::document::{DocumentTransformer, LayoutDocxTransformer, TransformFailure};
pub use pipeline::extract::{ExtractionOptions, ExtractionReport};
pub use table::{Cell, ColumnLabel, ExtractedTable, NormalizedTable, StrategyId};
