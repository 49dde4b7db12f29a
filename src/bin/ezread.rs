//! CLI binary for ezread.
//!
//! `serve` runs the HTTP service, `render` runs the pipeline locally on one
//! file, and `convert` drives a running server the way the web front-end
//! does.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ezread::{
    convert_document, CancelFlag, ConversionProgressCallback, ConversionRequest,
    ConversionService, EzreadClient, PageRasterizer, PdfiumRasterizer, Quality, ServiceConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for `render`: a spinner until the page count is known,
/// then a bar advanced once per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
        self.bar.reset_eta();
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{:.1}s", self.started.elapsed().as_secs_f64())),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, output_bytes: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages rendered  {}",
            green("✔"),
            bold(&total_pages.to_string()),
            dim(&format!("{} KiB", output_bytes / 1024)),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the service on port 8000 with artifacts kept in memory
  ezread serve

  # Persist artifacts on disk for two hours, four workers
  ezread serve --storage-dir /var/lib/ezread --retention-secs 7200 --workers 4

  # Convert a file locally, no server involved
  ezread render paper.pdf --quality medium -o paper_dark.pdf --preview paper.png

  # Upload to a running server and download both results
  ezread convert paper.pdf --server http://127.0.0.1:8000 --quality high -o out/

ENVIRONMENT VARIABLES:
  EZREAD_BIND             Listen address (serve)
  EZREAD_PUBLIC_URL       Origin prepended to returned artifact URLs
  EZREAD_STORAGE_DIR      Keep artifacts on disk instead of in memory
  EZREAD_SERVER           Server URL (convert)
  PDFIUM_LIB_PATH         Path to libpdfium; otherwise ./ then the system library
  RUST_LOG                Overrides the log filter
"#;

/// Dark-mode PDF conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "ezread",
    version,
    about = "Dark-mode PDF conversion: recolour every page and repack it as a PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EZREAD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EZREAD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP conversion service.
    Serve(ServeArgs),
    /// Convert a PDF locally.
    Render(RenderArgs),
    /// Convert a PDF through a running server.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "EZREAD_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Origin prepended to returned URLs, e.g. https://ezread.example.
    #[arg(long, env = "EZREAD_PUBLIC_URL")]
    public_url: Option<String>,

    /// Maximum upload size in MiB.
    #[arg(long, env = "EZREAD_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    /// Seconds an artifact stays downloadable.
    #[arg(long, env = "EZREAD_RETENTION_SECS", default_value_t = 3600)]
    retention_secs: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, env = "EZREAD_SWEEP_SECS", default_value_t = 300)]
    sweep_secs: u64,

    /// Conversions allowed to run at once. Default: CPU count, at most 16.
    #[arg(short, long, env = "EZREAD_WORKERS")]
    workers: Option<usize>,

    /// Requests allowed to wait for a worker. Default: 4 × workers.
    #[arg(long, env = "EZREAD_MAX_QUEUED")]
    max_queued: Option<usize>,

    /// Seconds a request may wait for a worker.
    #[arg(long, env = "EZREAD_QUEUE_TIMEOUT_SECS", default_value_t = 30)]
    queue_timeout_secs: u64,

    /// Seconds a conversion may run.
    #[arg(long, env = "EZREAD_CONVERSION_TIMEOUT_SECS", default_value_t = 300)]
    conversion_timeout_secs: u64,

    /// Keep artifacts in this directory instead of in memory.
    #[arg(long, env = "EZREAD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Reject documents with more pages than this.
    #[arg(long, env = "EZREAD_MAX_PAGES", default_value_t = 200)]
    max_pages: usize,

    /// Cap on the longest rendered edge in pixels.
    #[arg(long, env = "EZREAD_MAX_PIXELS", default_value_t = 6000)]
    max_pixels: u32,

    /// Skip the dark-mode recolouring.
    #[arg(long, env = "EZREAD_NO_DARK_MODE")]
    no_dark_mode: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// PDF to convert.
    input: PathBuf,

    /// Output quality.
    #[arg(long, value_enum, default_value = "medium")]
    quality: QualityArg,

    /// Output PDF. Default: <input stem>_converted.pdf next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write the first-page PNG preview here.
    #[arg(long)]
    preview: Option<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// PDF to upload.
    input: PathBuf,

    /// Server base URL.
    #[arg(long, env = "EZREAD_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Output quality.
    #[arg(long, value_enum, default_value = "medium")]
    quality: QualityArg,

    /// Directory for the downloaded PDF and preview.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds to wait for the server, conversion included.
    #[arg(long, env = "EZREAD_CLIENT_TIMEOUT_SECS", default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Low,
    Medium,
    High,
}

impl From<QualityArg> for Quality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Low => Quality::Low,
            QualityArg::Medium => Quality::Medium,
            QualityArg::High => Quality::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The server logs at info; the one-shot commands stay quiet behind
    // their progress output unless -v is given.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if matches!(cli.command, Command::Serve(_)) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Render(args) => render(args, cli.quiet).await,
        Command::Convert(args) => convert(args, cli.quiet).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut builder = ServiceConfig::builder()
        .bind_addr(args.bind)
        .max_upload_bytes(args.max_upload_mb.saturating_mul(1024 * 1024))
        .retention(Duration::from_secs(args.retention_secs))
        .sweep_interval(Duration::from_secs(args.sweep_secs))
        .queue_timeout(Duration::from_secs(args.queue_timeout_secs))
        .conversion_timeout(Duration::from_secs(args.conversion_timeout_secs))
        .max_pages(args.pipeline.max_pages)
        .max_rendered_pixels(args.pipeline.max_pixels)
        .dark_mode(!args.pipeline.no_dark_mode);

    if let Some(url) = args.public_url {
        builder = builder.public_base_url(url);
    }
    if let Some(n) = args.workers {
        builder = builder.max_concurrent(n);
    }
    if let Some(n) = args.max_queued {
        builder = builder.max_queued(n);
    }
    if let Some(dir) = args.storage_dir {
        builder = builder.storage_dir(dir);
    }
    if let Some(lib) = args.pipeline.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }

    let config = builder.build().context("Invalid configuration")?;
    tracing::info!(
        workers = config.max_concurrent,
        max_queued = config.max_queued,
        retention_secs = config.retention.as_secs(),
        "Starting ezread"
    );

    let service = ConversionService::from_config(config).context("Failed to start service")?;
    ezread::server::serve(service)
        .await
        .context("Server failed")?;
    Ok(())
}

async fn render(args: RenderArgs, quiet: bool) -> Result<()> {
    let source = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let config = ServiceConfig::builder()
        .max_pages(args.pipeline.max_pages)
        .max_rendered_pixels(args.pipeline.max_pixels)
        .dark_mode(!args.pipeline.no_dark_mode)
        .build()
        .context("Invalid configuration")?;

    let filename = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let request = ConversionRequest::validate(
        source.into(),
        Some(Quality::from(args.quality).as_str()),
        filename,
        usize::MAX,
    )
    .context("Input rejected")?;

    let output = args.output.clone().unwrap_or_else(|| {
        args.input
            .with_file_name(request.pdf_filename())
    });

    let progress: Option<Arc<CliProgressCallback>> = (!quiet).then(CliProgressCallback::new);
    let pdfium_lib = args.pipeline.pdfium_lib.clone();
    let pipeline = config.pipeline.clone();

    let started = Instant::now();
    let converted = tokio::task::spawn_blocking(move || {
        let rasterizer = PdfiumRasterizer::bind(pdfium_lib.as_deref())?;
        let rasterizer: &dyn PageRasterizer = &rasterizer;
        let cancel = CancelFlag::new();
        match &progress {
            Some(cb) => convert_document(&request, &pipeline, rasterizer, &cancel, cb.as_ref()),
            None => convert_document(
                &request,
                &pipeline,
                rasterizer,
                &cancel,
                &ezread::NoopProgressCallback,
            ),
        }
    })
    .await
    .context("Render task panicked")?
    .context("Conversion failed")?;

    write_atomic(&output, &converted.output_pdf)?;
    if let Some(ref preview) = args.preview {
        write_atomic(preview, &converted.preview_png)?;
    }

    if !quiet {
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            green("✔"),
            converted.page_count,
            started.elapsed().as_millis(),
            bold(&output.display().to_string()),
        );
        if let Some(ref preview) = args.preview {
            eprintln!("   preview  →  {}", dim(&preview.display().to_string()));
        }
    }
    Ok(())
}

async fn convert(args: ConvertArgs, quiet: bool) -> Result<()> {
    let source = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let filename = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let client = EzreadClient::new(&args.server, Duration::from_secs(args.timeout_secs))
        .context("Invalid server URL")?;

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Converting");
        bar.set_message(format!("{} → {}", filename, client.base_url()));
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    };

    let result = client
        .convert_and_fetch(source, &filename, args.quality.into())
        .await;
    spinner.finish_and_clear();
    let result = result.context("Conversion failed")?;

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    let pdf_path = args.output_dir.join(safe_file_name(&result.pdf.filename));
    let preview_path = args.output_dir.join(safe_file_name(&result.preview.filename));
    write_atomic(&pdf_path, &result.pdf.bytes)?;
    write_atomic(&preview_path, &result.preview.bytes)?;

    if !quiet {
        eprintln!(
            "{} {} {} pages, expires {}",
            green("✔"),
            cyan("◆"),
            result.response.pages,
            result.response.expires_at.format("%H:%M:%S UTC"),
        );
        eprintln!("   pdf      →  {}", bold(&pdf_path.display().to_string()));
        eprintln!("   preview  →  {}", dim(&preview_path.display().to_string()));
    }
    Ok(())
}

/// Keep only the final component of a server-supplied name.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .unwrap_or_else(|| "download".to_string())
}

/// Write via a temp file in the target directory, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}
