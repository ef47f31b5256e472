//! CLI binary for pdfconv.
//!
//! A thin shim over the library crate: every input goes through the same
//! `submit` → `fetch` → `stream_to` cycle an upload handler would use, with
//! a throwaway work folder standing in for the service's upload and
//! conversion folders.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pdfconv::{
    inspect, ArtifactManager, ConversionResult, ExtractionOptions, OutputKind, PdfEngine,
    PdfiumEngine, ServiceConfig,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to Word, next to the current directory
  pdfconv report.pdf

  # Tables to Excel, into ./out
  pdfconv --to xlsx statement.pdf -o out

  # Several files, four at a time, JSON summary
  pdfconv --to xlsx -j 4 --json a.pdf b.pdf c.pdf > results.json

  # Check a PDF and preview what table extraction would find
  pdfconv --inspect-only statement.pdf

ENVIRONMENT VARIABLES:
  PDFIUM_DYNAMIC_LIB_PATH  Path to the pdfium shared library
  PDFCONV_TO               Default output format (docx, xlsx)
  PDFCONV_OUTPUT_DIR       Default output folder
  PDFCONV_MAX_SIZE_MB      Upload ceiling in MiB (default 50)
  RUST_LOG                 Log filter, overrides --verbose/--quiet
"#;

/// Convert PDF files to Word or Excel documents.
#[derive(Parser, Debug)]
#[command(
    name = "pdfconv",
    version,
    about = "Convert PDF files to Word (.docx) or Excel (.xlsx) documents",
    long_about = "Convert PDF documents to editable Word documents, or extract their tables \
into a styled Excel workbook. Tables are detected from ruling lines first and from \
whitespace alignment second; PDFs without tables yield a workbook with an explanatory note.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to convert.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output format.
    #[arg(long = "to", env = "PDFCONV_TO", value_enum, default_value = "docx")]
    format: FormatArg,

    /// Folder receiving the converted files.
    #[arg(short, long = "output-dir", env = "PDFCONV_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Reject inputs larger than this many MiB.
    #[arg(long, env = "PDFCONV_MAX_SIZE_MB", default_value_t = 50,
          value_parser = clap::value_parser!(u64).range(1..=4096))]
    max_size_mb: u64,

    /// Number of files converted concurrently.
    #[arg(short, long, env = "PDFCONV_JOBS", default_value_t = 2)]
    jobs: usize,

    /// Fail with extraction_empty instead of writing a placeholder workbook.
    #[arg(long)]
    no_placeholder: bool,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFCONV_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFCONV_PASSWORD")]
    password: Option<String>,

    /// Print one JSON result per input instead of summary lines.
    #[arg(long, env = "PDFCONV_JSON")]
    json: bool,

    /// Validate the PDFs and report table extraction, write nothing.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDFCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFCONV_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Docx,
    Xlsx,
}

impl From<FormatArg> for OutputKind {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Docx => OutputKind::Document,
            FormatArg::Xlsx => OutputKind::Spreadsheet,
        }
    }
}

/// What happened to one input file.
#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    result: ConversionResult,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; keep INFO logs out of
    // its way unless the user asked for them.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── PDF engine ───────────────────────────────────────────────────────
    let mut engine = PdfiumEngine::new();
    if let Some(ref lib) = cli.pdfium_lib {
        engine = engine.with_library_path(lib);
    }
    if let Some(ref password) = cli.password {
        engine = engine.with_password(password);
    }
    let probe = engine.clone();
    tokio::task::spawn_blocking(move || probe.verify())
        .await
        .context("pdfium check panicked")?
        .context("pdfium is not available")?;
    let engine: Arc<dyn PdfEngine> = Arc::new(engine);

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let report = inspect(Arc::clone(&engine), input, ExtractionOptions::default())
                .await
                .with_context(|| format!("Failed to inspect {}", input.display()))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&report).context("Failed to serialise report")?
                );
                continue;
            }
            println!("File:         {}", input.display());
            println!("Valid:        {}", report.integrity.valid);
            println!("Reason:       {}", report.integrity.reason);
            println!("Pages:        {}", report.integrity.page_count);
            match report.strategy {
                Some(s) => println!("Strategy:     {s}"),
                None => println!("Strategy:     none (no tabular data)"),
            }
            for (i, (rows, cols)) in report.shapes.iter().enumerate() {
                println!("Table {:<3}     {rows} rows × {cols} columns", i + 1);
            }
        }
        return Ok(());
    }

    // ── Build manager ────────────────────────────────────────────────────
    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;
    let work = tempfile::tempdir().context("Failed to create work folder")?;
    let config = ServiceConfig::builder()
        .upload_dir(work.path().join("uploads"))
        .output_dir(work.path().join("converted"))
        .max_upload_bytes(cli.max_size_mb * 1024 * 1024)
        .placeholder_on_empty(!cli.no_placeholder)
        .purge_grace(Duration::ZERO)
        .build()?;
    let manager = ArtifactManager::new(config, engine).context("Failed to set up work folder")?;
    let kind = OutputKind::from(cli.format);

    let bar = if show_progress {
        let bar = ProgressBar::new(cli.inputs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {pos}/{len}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    // ── Run conversions ──────────────────────────────────────────────────
    let reports: Vec<FileReport> = stream::iter(cli.inputs.iter())
        .map(|input| {
            let manager = &manager;
            let out_dir = &cli.output_dir;
            let bar = bar.clone();
            async move {
                if let Some(ref b) = bar {
                    b.set_message(input.display().to_string());
                }
                let report = convert_one(manager, input, kind, out_dir).await;
                if let Some(ref b) = bar {
                    b.inc(1);
                }
                report
            }
        })
        .buffer_unordered(cli.jobs.max(1))
        .collect()
        .await;

    if let Some(b) = bar {
        b.finish_and_clear();
    }
    manager.shutdown().await;

    // ── Report ───────────────────────────────────────────────────────────
    let failed = reports.iter().filter(|r| !r.result.is_success()).count();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise results")?
        );
    } else if !cli.quiet {
        for r in &reports {
            match (&r.result, &r.output) {
                (ConversionResult::Success { message, .. }, Some(out)) => eprintln!(
                    "{} {}  →  {}  {}",
                    green("✔"),
                    r.input.display(),
                    bold(&out.display().to_string()),
                    dim(&format!("{}ms  {message}", r.elapsed_ms)),
                ),
                (result, _) => eprintln!(
                    "{} {}  {}",
                    red("✘"),
                    r.input.display(),
                    red(result.message())
                ),
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} conversion(s) failed", reports.len());
    }
    Ok(())
}

/// Submit one file, then download the artifact into `out_dir`.
async fn convert_one(
    manager: &ArtifactManager,
    input: &Path,
    kind: OutputKind,
    out_dir: &Path,
) -> FileReport {
    let start = Instant::now();
    let report = |result: ConversionResult, output: Option<PathBuf>| FileReport {
        input: input.to_path_buf(),
        output,
        result,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };
    let failure = |message: String| ConversionResult::Failure {
        kind: pdfconv::ErrorKind::StorageFailure,
        message,
    };

    let bytes = match tokio::fs::read(input).await {
        Ok(b) => b,
        Err(e) => return report(failure(format!("Failed to read input: {e}")), None),
    };
    let declared = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let result = manager.submit(&bytes, &declared, kind).await;
    let Some(id) = result.artifact_id() else {
        return report(result, None);
    };

    let delivery = match manager.fetch(id.as_str()).await {
        Ok(d) => d,
        Err(e) => return report(failure(e.to_string()), None),
    };
    let dest = out_dir.join(delivery.download_name());
    let mut file = match tokio::fs::File::create(&dest).await {
        Ok(f) => f,
        Err(e) => {
            return report(
                failure(format!("Failed to create {}: {e}", dest.display())),
                None,
            )
        }
    };
    match delivery.stream_to(&mut file).await {
        Ok(_) => report(result, Some(dest)),
        Err(e) => report(failure(e.user_message()), None),
    }
}
