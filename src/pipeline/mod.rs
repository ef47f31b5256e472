//! Pipeline stages for PDF-to-Office conversion.
//!
//! Each submodule implements one step and is tested on its own with
//! synthetic page layouts, so none of them needs a pdfium library at test
//! time.
//!
//! ## Data Flow
//!
//! ```text
//!                    ┌─▶ extract ──▶ normalize ──▶ spreadsheet   (.xlsx)
//! integrity ──▶ ─────┤
//!  (probe)           └─▶ document                                (.docx)
//! ```
//!
//! 1. [`integrity`]   — structural and engine probe; rejects corrupt uploads
//! 2. [`layout`]      — geometry helpers: lines, position clusters, projections
//! 3. [`extract`]     — the four-rung table extraction ladder
//! 4. [`normalize`]   — header inference, flattening and pruning
//! 5. [`spreadsheet`] — styled workbook writer
//! 6. [`document`]    — word-processing conversion with output post-checks
//! 7. [`ooxml`]       — zip packaging shared by both writers
//!
//! All stages are blocking; async callers run them in `spawn_blocking`
//! because pdfium is not async-safe.

pub mod document;
pub mod extract;
pub mod integrity;
pub mod layout;
pub mod normalize;
pub mod ooxml;
pub mod spreadsheet;
