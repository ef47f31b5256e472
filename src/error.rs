//! Error types for the pdfconv library.
//!
//! Three layers, three types:
//!
//! * [`EngineError`] — the PDF engine could not load or read a document.
//!   Produced by [`crate::engine::PdfEngine`] implementations only.
//!
//! * [`ConversionFailure`] — the document transformer failed or produced a
//!   broken container. Built exclusively by
//!   [`crate::pipeline::document::classify_transform_failure`] and the
//!   post-checks next to it, so raw transformer text never reaches a user.
//!
//! * [`ConvertError`] — everything a conversion request can end with. Each
//!   variant maps onto exactly one [`ErrorKind`], the closed taxonomy the
//!   lifecycle manager reports back to callers.
//!
//! [`FetchError`] and [`ConfigError`] cover downloads and configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing file, wrong extension or oversize payload. Nothing was processed.
    InputRejected,
    /// The upload is not a readable PDF (empty, truncated, zero pages…).
    InvalidSource,
    /// No extraction strategy found tabular data (spreadsheet path only).
    ExtractionEmpty,
    /// The transformer raised an error or produced a malformed container.
    ConversionFailed,
    /// Unexpected filesystem error while saving, reading or deleting.
    StorageFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InputRejected => "input_rejected",
            ErrorKind::InvalidSource => "invalid_source",
            ErrorKind::ExtractionEmpty => "extraction_empty",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::StorageFailure => "storage_failure",
        };
        f.write_str(s)
    }
}

/// All errors a conversion request can end with.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No file name or no bytes were supplied.
    #[error("No file selected")]
    MissingFile,

    /// The declared file name does not end in `.pdf`.
    #[error("Only PDF files are allowed")]
    UnsupportedExtension { name: String },

    /// The upload exceeds the configured ceiling.
    #[error("File too large. Maximum size is {}MB.", .limit / (1024 * 1024))]
    TooLarge { size: u64, limit: u64 },

    // ── Source errors ─────────────────────────────────────────────────────
    /// The integrity check rejected the stored upload.
    #[error("{reason}")]
    InvalidSource { path: PathBuf, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The ladder found no tables and the placeholder policy is disabled.
    #[error(
        "No tabular data found in the PDF. \
         The document may be image-only (scanned) or contain only prose."
    )]
    ExtractionEmpty,

    // ── Conversion errors ─────────────────────────────────────────────────
    #[error(transparent)]
    Conversion(#[from] ConversionFailure),

    // ── Storage errors ────────────────────────────────────────────────────
    /// Filesystem error while saving, reading or deleting a transient file.
    #[error("Storage error while trying to {op} '{path}': {source}")]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// A blocking task panicked or the runtime misbehaved.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Shorthand for [`ConvertError::Storage`].
    pub fn storage(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Storage {
            op,
            path: path.into(),
            source,
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::MissingFile
            | ConvertError::UnsupportedExtension { .. }
            | ConvertError::TooLarge { .. } => ErrorKind::InputRejected,
            ConvertError::InvalidSource { .. } => ErrorKind::InvalidSource,
            ConvertError::ExtractionEmpty => ErrorKind::ExtractionEmpty,
            ConvertError::Conversion(_) | ConvertError::Internal(_) => ErrorKind::ConversionFailed,
            ConvertError::Storage { .. } => ErrorKind::StorageFailure,
        }
    }

    /// Message safe to show an end user.
    ///
    /// Storage and internal errors carry paths and OS detail, so they are
    /// replaced by a generic sentence; the full error goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            ConvertError::Storage { .. } | ConvertError::Internal(_) => {
                "An unexpected error occurred while handling the file. Please try again.".into()
            }
            other => other.to_string(),
        }
    }
}

/// Sanitised classification of a document transformer failure.
///
/// `detail` fields keep the raw text for logging; `Display` never shows it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionFailure {
    /// The PDF runtime (pdfium) or another required component is unavailable.
    #[error("Conversion failed: a required PDF component is not installed on the server.")]
    MissingDependency { detail: String },

    /// The transformer could not read the source or write the destination.
    #[error("Conversion failed: permission denied while accessing the file.")]
    PermissionDenied { detail: String },

    /// The document exhausted available memory.
    #[error("Conversion failed: the document is too large or complex to convert.")]
    OutOfMemory { detail: String },

    /// The produced file is missing, empty or not a valid package.
    #[error("Conversion failed: the converter produced an invalid output file.")]
    MalformedOutput { detail: String },

    /// Anything else.
    #[error("Conversion failed: the PDF could not be converted. It may use unsupported features.")]
    Generic { detail: String },
}

impl ConversionFailure {
    /// Raw detail for logs.
    pub fn detail(&self) -> &str {
        match self {
            ConversionFailure::MissingDependency { detail }
            | ConversionFailure::PermissionDenied { detail }
            | ConversionFailure::OutOfMemory { detail }
            | ConversionFailure::MalformedOutput { detail }
            | ConversionFailure::Generic { detail } => detail,
        }
    }
}

/// Errors raised by a [`crate::engine::PdfEngine`].
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The pdfium shared library could not be bound.
    #[error("Failed to bind to pdfium library: {0}")]
    Binding(String),

    /// The document could not be opened.
    #[error("{detail}")]
    Load { detail: String },

    /// The document is encrypted and no password is available.
    #[error("PDF is encrypted and requires a password")]
    PasswordRequired,

    /// A specific page could not be read.
    #[error("page {page}: {detail}")]
    Page { page: usize, detail: String },
}

/// Errors returned by [`crate::lifecycle::ArtifactManager::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Unknown id, already downloaded, or expired.
    #[error("File not found or has expired")]
    NotFound { id: String },

    /// The artifact is registered but could not be opened.
    #[error("Storage error while trying to open '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while building a [`crate::config::ServiceConfig`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display_uses_megabytes() {
        let e = ConvertError::TooLarge {
            size: 60 * 1024 * 1024,
            limit: 50 * 1024 * 1024,
        };
        assert_eq!(e.to_string(), "File too large. Maximum size is 50MB.");
        assert_eq!(e.kind(), ErrorKind::InputRejected);
    }

    #[test]
    fn storage_error_is_sanitised_for_users() {
        let e = ConvertError::storage(
            "write",
            "/srv/uploads/secret.pdf",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(e.kind(), ErrorKind::StorageFailure);
        let msg = e.user_message();
        assert!(!msg.contains("secret"), "got: {msg}");
        assert!(!msg.contains("disk full"), "got: {msg}");
    }

    #[test]
    fn conversion_failure_hides_raw_detail() {
        let e: ConvertError = ConversionFailure::Generic {
            detail: "Traceback: KeyError 'xref'".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::ConversionFailed);
        assert!(!e.user_message().contains("Traceback"));
    }

    #[test]
    fn invalid_source_shows_reason() {
        let e = ConvertError::InvalidSource {
            path: "/tmp/x.pdf".into(),
            reason: "PDF file appears to be empty".into(),
        };
        assert_eq!(e.user_message(), "PDF file appears to be empty");
        assert_eq!(e.kind(), ErrorKind::InvalidSource);
    }

    #[test]
    fn error_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ExtractionEmpty).unwrap();
        assert_eq!(json, "\"extraction_empty\"");
        assert_eq!(ErrorKind::StorageFailure.to_string(), "storage_failure");
    }
}
