//! Artifact lifecycle: validate → convert → deliver once → purge.
//!
//! [`ArtifactManager`] is the entry point an upload handler talks to. One
//! call to [`ArtifactManager::submit`] takes raw upload bytes through the
//! whole request:
//!
//! ```text
//! Received ──▶ Validated ──▶ Converting ──▶ Ready ──▶ Delivered ──▶ Purged
//!    │             │              │            │
//!    └──▶ Rejected ◀┘             └──▶ Purged  └──▶ Purged (unclaimed)
//! ```
//!
//! ## Invariants
//!
//! - Boundary checks (name, extension, size) run before anything is written.
//! - The stored upload is deleted on every path out of the request, success
//!   or failure.
//! - Every stored filename starts with a fresh UUID, so concurrent requests
//!   never share a path and need no locking.
//! - An artifact is handed out at most once: [`ArtifactManager::fetch`]
//!   removes it from the registry. It is then deleted right after the
//!   download ([`DeliveryMode::Immediate`]) or after a grace period
//!   ([`DeliveryMode::Deferred`]). Artifacts nobody fetches are purged after
//!   [`ServiceConfig::unclaimed_ttl`], and a download that is dropped half
//!   way is purged as abandoned.

use crate::config::{DeliveryMode, OutputKind, ServiceConfig};
use crate::convert::{convert_to_document, convert_to_spreadsheet};
use crate::engine::PdfEngine;
use crate::error::{ConvertError, ErrorKind, FetchError};
use crate::pipeline::document::{
    classify_transform_failure, DocumentTransformer, LayoutDocxTransformer,
};
use crate::pipeline::integrity;
use crate::purge::{purge_now, PurgeScheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name used when nothing usable survives filename sanitisation.
const FALLBACK_STEM: &str = "document";

// ── Request state ────────────────────────────────────────────────────────

/// Where a single conversion request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Validated,
    Converting,
    Ready,
    Delivered,
    Purged,
    Rejected,
}

impl RequestState {
    /// True if the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, Converting)
                | (Validated, Rejected)
                | (Converting, Ready)
                | (Converting, Purged)
                | (Ready, Delivered)
                | (Ready, Purged)
                | (Delivered, Purged)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Purged | RequestState::Rejected)
    }
}

/// A request's id and current state, logging every move.
#[derive(Debug)]
struct RequestTracker {
    id: Uuid,
    state: RequestState,
}

impl RequestTracker {
    fn new() -> Self {
        let id = Uuid::new_v4();
        debug!(request = %id, "Request received");
        Self {
            id,
            state: RequestState::Received,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if self.state.can_transition_to(next) {
            debug!(request = %self.id, from = ?self.state, to = ?next, "State change");
            self.state = next;
        } else {
            error!(request = %self.id, from = ?self.state, to = ?next, "Illegal state change");
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// Handle of a converted artifact: its stored filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of [`ArtifactManager::submit`]. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionResult {
    Success {
        artifact_id: ArtifactId,
        download_name: String,
        message: String,
    },
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl ConversionResult {
    fn failure(e: &ConvertError) -> Self {
        ConversionResult::Failure {
            kind: e.kind(),
            message: e.user_message(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }

    pub fn artifact_id(&self) -> Option<&ArtifactId> {
        match self {
            ConversionResult::Success { artifact_id, .. } => Some(artifact_id),
            ConversionResult::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ConversionResult::Success { .. } => None,
            ConversionResult::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ConversionResult::Success { message, .. } | ConversionResult::Failure { message, .. } => {
                message
            }
        }
    }
}

// ── Filenames ────────────────────────────────────────────────────────────

/// True if `name` declares a `.pdf` extension (case-insensitive).
pub fn has_pdf_extension(name: &str) -> bool {
    Path::new(name.trim())
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Reduce an uploaded filename to a safe `<stem>.pdf`.
///
/// Directory components are dropped, whitespace becomes `_`, and anything
/// other than ASCII letters, digits, `.`, `_` and `-` is removed. Leading
/// and trailing dots and underscores are stripped. An empty result falls
/// back to `document.pdf`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');
    let stem = if cleaned.is_empty() { FALLBACK_STEM } else { cleaned };
    format!("{stem}.pdf")
}

/// Presentable name for a stored filename: the request UUID prefix removed.
pub fn download_name(stored: &str) -> &str {
    stored.split_once('_').map_or(stored, |(_, rest)| rest)
}

// ── Manager ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ArtifactRecord {
    path: PathBuf,
    kind: OutputKind,
    size: u64,
    created_at: DateTime<Utc>,
    registered_at: Instant,
}

/// Runs conversion requests and owns the artifacts they produce.
pub struct ArtifactManager {
    config: ServiceConfig,
    engine: Arc<dyn PdfEngine>,
    transformer: Arc<dyn DocumentTransformer>,
    registry: Registry,
    purger: PurgeScheduler,
}

type Registry = Arc<Mutex<HashMap<String, ArtifactRecord>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<String, ArtifactRecord>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

impl fmt::Debug for ArtifactManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactManager")
            .field("config", &self.config)
            .field("artifacts", &self.lock().len())
            .field("purger", &self.purger)
            .finish()
    }
}

impl ArtifactManager {
    /// Create a manager, creating the upload and output folders if needed.
    ///
    /// Word-processing output uses [`LayoutDocxTransformer`] over `engine`
    /// unless replaced with [`ArtifactManager::with_transformer`].
    pub fn new(config: ServiceConfig, engine: Arc<dyn PdfEngine>) -> Result<Self, ConvertError> {
        for dir in [&config.upload_dir, &config.output_dir] {
            std::fs::create_dir_all(dir).map_err(|e| ConvertError::storage("create", dir, e))?;
        }
        Ok(Self {
            transformer: Arc::new(LayoutDocxTransformer::new(Arc::clone(&engine))),
            config,
            engine,
            registry: Arc::new(Mutex::new(HashMap::new())),
            purger: PurgeScheduler::new(),
        })
    }

    /// Use `transformer` for word-processing output.
    pub fn with_transformer(mut self, transformer: Arc<dyn DocumentTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ArtifactRecord>> {
        lock_registry(&self.registry)
    }

    /// Number of artifacts waiting for their download.
    ///
    /// Expired artifacts leave the registry when their unclaimed timer
    /// fires.
    pub fn pending_artifacts(&self) -> usize {
        self.lock().len()
    }

    /// Convert an uploaded PDF into an artifact of `kind`.
    ///
    /// Every failure comes back as [`ConversionResult::Failure`]; this never
    /// returns an error or panics on bad input.
    pub async fn submit(
        &self,
        bytes: &[u8],
        declared_name: &str,
        kind: OutputKind,
    ) -> ConversionResult {
        let mut request = RequestTracker::new();

        // ── Step 1: boundary checks, nothing written yet ─────────────────
        if let Err(e) = self.check_upload(bytes, declared_name) {
            info!(request = %request.id, "Upload rejected: {e}");
            request.advance(RequestState::Rejected);
            return ConversionResult::failure(&e);
        }

        // ── Step 2: store the upload ─────────────────────────────────────
        let safe_name = sanitize_filename(declared_name);
        let source = self
            .config
            .upload_dir
            .join(format!("{}_{}", request.id, safe_name));
        if let Err(e) = tokio::fs::write(&source, bytes).await {
            let err = ConvertError::storage("save", &source, e);
            error!(request = %request.id, "{err}");
            purge_now(&source).await;
            request.advance(RequestState::Rejected);
            return ConversionResult::failure(&err);
        }
        info!(
            request = %request.id,
            bytes = bytes.len(),
            "Stored upload {}",
            source.display()
        );

        // ── Step 3: integrity gate ───────────────────────────────────────
        let report = {
            let engine = Arc::clone(&self.engine);
            let path = source.clone();
            tokio::task::spawn_blocking(move || integrity::check(engine.as_ref(), &path))
                .await
                .map_err(|e| ConvertError::Internal(format!("integrity task panicked: {e}")))
                .and_then(|checked| {
                    checked.map_err(|e| {
                        ConvertError::from(classify_transform_failure(&e.to_string()))
                    })
                })
        };
        let report = match report {
            Ok(r) => r,
            Err(e) => {
                error!(request = %request.id, "Integrity check could not run: {e:?}");
                purge_now(&source).await;
                request.advance(RequestState::Rejected);
                return ConversionResult::failure(&e);
            }
        };
        if !report.valid {
            purge_now(&source).await;
            request.advance(RequestState::Rejected);
            return ConversionResult::failure(&ConvertError::InvalidSource {
                path: source,
                reason: report.reason,
            });
        }
        request.advance(RequestState::Validated);

        // ── Step 4: convert ──────────────────────────────────────────────
        request.advance(RequestState::Converting);
        let stem = safe_name.trim_end_matches(".pdf");
        let artifact_name = format!("{}_{}.{}", request.id, stem, kind.extension());
        let dest = self.config.output_dir.join(&artifact_name);
        let outcome = self.run_conversion(kind, source.clone(), dest.clone()).await;

        // The upload never outlives the request.
        purge_now(&source).await;

        let message = match outcome {
            Ok(message) => message,
            Err(e) => {
                match e.kind() {
                    ErrorKind::StorageFailure | ErrorKind::ConversionFailed => {
                        error!(request = %request.id, "Conversion failed: {e}")
                    }
                    _ => info!(request = %request.id, "Conversion ended without output: {e}"),
                }
                purge_now(&dest).await;
                request.advance(RequestState::Purged);
                return ConversionResult::failure(&e);
            }
        };

        // ── Step 5: register and arm the unclaimed timer ─────────────────
        let size = match tokio::fs::metadata(&dest).await {
            Ok(m) => m.len(),
            Err(e) => {
                let err = ConvertError::storage("read", &dest, e);
                error!(request = %request.id, "{err}");
                purge_now(&dest).await;
                request.advance(RequestState::Purged);
                return ConversionResult::failure(&err);
            }
        };
        self.lock().insert(
            artifact_name.clone(),
            ArtifactRecord {
                path: dest.clone(),
                kind,
                size,
                created_at: Utc::now(),
                registered_at: Instant::now(),
            },
        );
        let registry = Arc::clone(&self.registry);
        let expired = artifact_name.clone();
        self.purger.schedule_then(
            artifact_name.clone(),
            vec![dest],
            self.config.unclaimed_ttl,
            move || {
                if lock_registry(&registry).remove(&expired).is_some() {
                    debug!(artifact = %expired, "Unclaimed artifact expired");
                }
            },
        );
        request.advance(RequestState::Ready);

        info!(request = %request.id, artifact = %artifact_name, size, "Artifact ready");
        ConversionResult::Success {
            download_name: download_name(&artifact_name).to_string(),
            artifact_id: ArtifactId(artifact_name),
            message,
        }
    }

    fn check_upload(&self, bytes: &[u8], declared_name: &str) -> Result<(), ConvertError> {
        if declared_name.trim().is_empty() {
            return Err(ConvertError::MissingFile);
        }
        if !has_pdf_extension(declared_name) {
            return Err(ConvertError::UnsupportedExtension {
                name: declared_name.to_string(),
            });
        }
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(ConvertError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Run the blocking conversion for `kind`; returns the success message.
    async fn run_conversion(
        &self,
        kind: OutputKind,
        source: PathBuf,
        dest: PathBuf,
    ) -> Result<String, ConvertError> {
        let task = match kind {
            OutputKind::Document => {
                let transformer = Arc::clone(&self.transformer);
                tokio::task::spawn_blocking(move || {
                    convert_to_document(transformer.as_ref(), &source, &dest)
                        .map(|()| "Conversion completed successfully".to_string())
                })
            }
            OutputKind::Spreadsheet => {
                let engine = Arc::clone(&self.engine);
                let options = self.config.extraction;
                let placeholder = self.config.placeholder_on_empty;
                tokio::task::spawn_blocking(move || {
                    convert_to_spreadsheet(engine.as_ref(), &source, &dest, options, placeholder)
                        .map(|outcome| outcome.message())
                })
            }
        };
        task.await
            .map_err(|e| ConvertError::Internal(format!("conversion task panicked: {e}")))?
    }

    /// Hand out the artifact `id` for its one and only download.
    pub async fn fetch(&self, id: &str) -> Result<Delivery, FetchError> {
        let record = self.lock().remove(id).ok_or_else(|| FetchError::NotFound {
            id: id.to_string(),
        })?;
        if record.registered_at.elapsed() >= self.config.unclaimed_ttl {
            debug!(artifact = %id, "Fetch after expiry");
            self.purger.schedule(id, vec![record.path], std::time::Duration::ZERO);
            return Err(FetchError::NotFound { id: id.to_string() });
        }
        self.purger.cancel(id);

        let mode = self.config.delivery_mode(record.kind);
        let grace = self.config.purge_grace;
        match tokio::fs::File::open(&record.path).await {
            Ok(file) => {
                info!(artifact = %id, ?mode, "Delivering artifact");
                Ok(Delivery {
                    file: Some(file),
                    key: id.to_string(),
                    download_name: download_name(id).to_string(),
                    path: record.path,
                    kind: record.kind,
                    size: record.size,
                    created_at: record.created_at,
                    mode,
                    grace,
                    purger: self.purger.clone(),
                    state: RequestState::Ready,
                })
            }
            Err(e) => {
                // Still purge whatever is left behind.
                self.purger.schedule(id, vec![record.path.clone()], grace);
                Err(FetchError::Storage {
                    path: record.path,
                    source: e,
                })
            }
        }
    }

    /// Delete every artifact still waiting for a download and every pending
    /// purge. Returns the number of artifacts dropped from the registry.
    pub async fn shutdown(&self) -> usize {
        let records: Vec<(String, ArtifactRecord)> = self.lock().drain().collect();
        let count = records.len();
        for (id, record) in records {
            self.purger.cancel(&id);
            purge_now(&record.path).await;
        }
        self.purger.flush();
        info!("Shut down, purged {count} unclaimed artifact(s)");
        count
    }
}

// ── Delivery ─────────────────────────────────────────────────────────────

/// A fetched artifact, ready to be streamed exactly once.
///
/// Dropping a `Delivery` without completing [`Delivery::stream_to`] counts
/// as an abandoned download; the file is purged after the grace period.
pub struct Delivery {
    file: Option<tokio::fs::File>,
    key: String,
    download_name: String,
    path: PathBuf,
    kind: OutputKind,
    size: u64,
    created_at: DateTime<Utc>,
    mode: DeliveryMode,
    grace: std::time::Duration,
    purger: PurgeScheduler,
    state: RequestState,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("download_name", &self.download_name)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .finish()
    }
}

impl Delivery {
    /// Name to present to the user (request id stripped).
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy the artifact into `writer`, then delete it per the delivery mode.
    ///
    /// On a write error the artifact is purged as abandoned.
    pub async fn stream_to<W>(mut self, writer: &mut W) -> Result<u64, ConvertError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Some(mut file) = self.file.take() else {
            return Err(ConvertError::Internal("delivery already consumed".into()));
        };
        let copied = tokio::io::copy(&mut file, writer)
            .await
            .map_err(|e| ConvertError::storage("send", &self.path, e))?;
        writer
            .flush()
            .await
            .map_err(|e| ConvertError::storage("send", &self.path, e))?;
        drop(file);

        self.advance(RequestState::Delivered);
        match self.mode {
            DeliveryMode::Immediate => {
                purge_now(&self.path).await;
            }
            DeliveryMode::Deferred => {
                self.purger
                    .schedule(self.key.clone(), vec![self.path.clone()], self.grace);
            }
        }
        self.advance(RequestState::Purged);
        info!(
            artifact = %self.key,
            bytes = copied,
            "Delivered {}",
            self.download_name
        );
        Ok(copied)
    }

    fn advance(&mut self, next: RequestState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(artifact = %self.key, "Download abandoned, scheduling purge");
        self.file.take();
        self.purger
            .schedule(self.key.clone(), vec![self.path.clone()], self.grace);
    }
}
