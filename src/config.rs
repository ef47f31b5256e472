//! Configuration for the conversion service.
//!
//! Every knob the lifecycle manager needs lives in [`ServiceConfig`], built
//! via [`ServiceConfigBuilder`] and handed to
//! [`crate::lifecycle::ArtifactManager::new`]. There is no process-wide
//! state: two managers with different folders or ceilings can coexist in
//! one process (the integration tests rely on this).

use crate::error::ConfigError;
use crate::pipeline::extract::ExtractionOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default upload ceiling: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for an [`crate::lifecycle::ArtifactManager`].
///
/// # Example
/// ```rust
/// use pdfconv::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .upload_dir("/var/tmp/pdfconv/uploads")
///     .output_dir("/var/tmp/pdfconv/converted")
///     .max_upload_bytes(20 * 1024 * 1024)
///     .purge_grace(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Folder receiving uploaded PDFs. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Folder receiving converted artifacts. Default: `converted`.
    pub output_dir: PathBuf,

    /// Uploads larger than this are rejected before anything touches disk.
    /// Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Delay between delivery and deletion in [`DeliveryMode::Deferred`].
    /// Default: 5 s.
    ///
    /// Some download paths hand the open file to a slower writer after the
    /// response headers go out; deleting immediately would race them.
    pub purge_grace: Duration,

    /// How long a converted artifact waits for its first download before it
    /// is purged anyway. Default: 15 min.
    pub unclaimed_ttl: Duration,

    /// Delivery mode for word-processing artifacts. Default: `Immediate`.
    pub document_delivery: DeliveryMode,

    /// Delivery mode for spreadsheet artifacts. Default: `Deferred`.
    pub spreadsheet_delivery: DeliveryMode,

    /// Render a placeholder sheet when no table is found. Default: true.
    ///
    /// When false, an empty extraction ladder ends the request with
    /// [`crate::error::ErrorKind::ExtractionEmpty`] instead.
    pub placeholder_on_empty: bool,

    /// Geometry tolerances for the table extraction ladder.
    pub extraction: ExtractionOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("converted"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            purge_grace: Duration::from_secs(5),
            unclaimed_ttl: Duration::from_secs(15 * 60),
            document_delivery: DeliveryMode::Immediate,
            spreadsheet_delivery: DeliveryMode::Deferred,
            placeholder_on_empty: true,
            extraction: ExtractionOptions::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Delivery mode in effect for artifacts of `kind`.
    pub fn delivery_mode(&self, kind: OutputKind) -> DeliveryMode {
        match kind {
            OutputKind::Document => self.document_delivery,
            OutputKind::Spreadsheet => self.spreadsheet_delivery,
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn purge_grace(mut self, grace: Duration) -> Self {
        self.config.purge_grace = grace;
        self
    }

    pub fn unclaimed_ttl(mut self, ttl: Duration) -> Self {
        self.config.unclaimed_ttl = ttl;
        self
    }

    pub fn document_delivery(mut self, mode: DeliveryMode) -> Self {
        self.config.document_delivery = mode;
        self
    }

    pub fn spreadsheet_delivery(mut self, mode: DeliveryMode) -> Self {
        self.config.spreadsheet_delivery = mode;
        self
    }

    pub fn placeholder_on_empty(mut self, v: bool) -> Self {
        self.config.placeholder_on_empty = v;
        self
    }

    pub fn extraction(mut self, options: ExtractionOptions) -> Self {
        self.config.extraction = options;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(ConfigError("max_upload_bytes must be > 0".into()));
        }
        if c.unclaimed_ttl.is_zero() {
            return Err(ConfigError("unclaimed_ttl must be > 0".into()));
        }
        if c.upload_dir.as_os_str().is_empty() || c.output_dir.as_os_str().is_empty() {
            return Err(ConfigError("upload_dir and output_dir must be set".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Word-processing document (`.docx`).
    Document,
    /// Spreadsheet workbook (`.xlsx`).
    Spreadsheet,
}

impl OutputKind {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Document => "docx",
            OutputKind::Spreadsheet => "xlsx",
        }
    }

    /// MIME type announced with the download.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputKind::Document => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputKind::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// When a delivered artifact is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Delete synchronously once the download has been fully written.
    Immediate,
    /// Delete after [`ServiceConfig::purge_grace`] on a background timer.
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServiceConfig::default();
        assert_eq!(c.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(c.purge_grace, Duration::from_secs(5));
        assert_eq!(c.delivery_mode(OutputKind::Document), DeliveryMode::Immediate);
        assert_eq!(c.delivery_mode(OutputKind::Spreadsheet), DeliveryMode::Deferred);
        assert!(c.placeholder_on_empty);
    }

    #[test]
    fn builder_rejects_zero_ceiling() {
        let err = ServiceConfig::builder().max_upload_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("max_upload_bytes"));
    }

    #[test]
    fn builder_rejects_zero_ttl() {
        assert!(ServiceConfig::builder()
            .unclaimed_ttl(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn output_kind_mime_and_extension() {
        assert_eq!(OutputKind::Document.extension(), "docx");
        assert!(OutputKind::Spreadsheet.mime_type().ends_with("spreadsheetml.sheet"));
        assert!(OutputKind::Document
            .mime_type()
            .ends_with("wordprocessingml.document"));
    }
}
