//! CLI binary for pagemill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one conversion or the HTTP server, and prints
//! results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagemill::{
    server, write_artifact, CancelToken, ConversionPipeline, ConversionProgressCallback,
    ConversionRequest, DocumentSource, ImageKind, OutputArtifact, PipelineConfig, ProgressCallback,
    RawImage, RendererKind,
};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback. Pages complete out of order, so per-page
/// lines are printed above a single bar as they land.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Label for log lines: "Image" or "Page".
    unit: &'static str,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Staging input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Starting conversion of {total_pages} {}s…",
                self.unit.to_lowercase()
            ))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar
            .set_message(format!("{} {page_num}", self.unit.to_lowercase()));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, bytes: usize) {
        let elapsed = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} {} {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            self.unit,
            page_num,
            total,
            dim(&format!("{:>8} bytes", bytes)),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            self.unit,
            page_num,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_pages.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} {}s processed",
                green("✔"),
                bold(&success_count.to_string()),
                self.unit.to_lowercase()
            );
        } else {
            eprintln!(
                "{} {}/{} processed  ({} failed)",
                red("✘"),
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

impl Drop for CliProgressCallback {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Bundle scans into one PDF, one page per image
  pagemill images-to-pdf scan-1.png scan-2.jpg -o scans.pdf

  # Rasterise every page as JPEG at 2× (144 dpi)
  pagemill pdf-to-images report.pdf -o report.zip --format jpeg --scale 2

  # Single-page document → a single image file
  pagemill pdf-to-images cover.pdf -o cover.png

  # Serve the HTTP API
  pagemill serve --listen 0.0.0.0:8080

  # Use poppler instead of pdfium
  PAGEMILL_RENDERER=poppler pagemill pdf-to-images report.pdf -o pages.zip
"#;

#[derive(Parser, Debug)]
#[command(
    name = "pagemill",
    version,
    about = "Convert images into paginated PDF documents and PDF pages into images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PAGEMILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAGEMILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAGEMILL_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP conversion API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "PAGEMILL_LISTEN", default_value = "127.0.0.1:8080")]
        listen: SocketAddr,

        /// Maximum request body size in MiB.
        #[arg(long, env = "PAGEMILL_BODY_LIMIT_MB", default_value_t = 256)]
        body_limit_mb: usize,
    },

    /// Build a PDF with one full-bleed page per image, in argument order.
    ImagesToPdf {
        /// PNG or JPEG images.
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output PDF path.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rasterise every page of a PDF.
    PdfToImages {
        /// Input PDF.
        input: PathBuf,

        /// Output path: an image for one-page documents, a zip otherwise.
        #[arg(short, long)]
        output: PathBuf,

        /// Output image format: png or jpeg (unknown values fall back to the default).
        #[arg(long, env = "PAGEMILL_FORMAT")]
        format: Option<String>,

        /// Scale factor over the page size in points (0.1–8.0).
        #[arg(long, env = "PAGEMILL_SCALE")]
        scale: Option<String>,

        /// Resolution in DPI; used when --scale is absent or invalid.
        #[arg(long, env = "PAGEMILL_RESOLUTION")]
        resolution: Option<String>,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Page renderer: pdfium or poppler.
    #[arg(long, global = true, env = "PAGEMILL_RENDERER", default_value = "pdfium")]
    renderer: RendererKind,

    /// Path to the pdfium shared library (file or directory).
    #[arg(long, global = true, env = "PAGEMILL_PDFIUM_LIBRARY")]
    pdfium_library: Option<PathBuf>,

    /// Root directory for per-request scratch areas.
    #[arg(long, global = true, env = "PAGEMILL_SCRATCH_ROOT")]
    scratch_root: Option<PathBuf>,

    /// Concurrent image jobs per request.
    #[arg(long, global = true, env = "PAGEMILL_IMAGES_CONCURRENCY", default_value_t = 8)]
    images_concurrency: usize,

    /// Concurrent page-render jobs per request.
    #[arg(long, global = true, env = "PAGEMILL_PAGES_CONCURRENCY", default_value_t = 2)]
    pages_concurrency: usize,

    /// JPEG quality for rasterised pages (1–100).
    #[arg(long, global = true, env = "PAGEMILL_JPEG_QUALITY", default_value_t = 90)]
    jpeg_quality: u8,

    /// Longest-edge cap for rendered pages, in pixels.
    #[arg(long, global = true, env = "PAGEMILL_MAX_PIXELS", default_value_t = 10_000)]
    max_pixels: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar replaces INFO logs for one-shot conversions; the server logs.
    let is_server = matches!(cli.command, Command::Serve { .. });
    let show_progress = !cli.quiet && !cli.no_progress && !is_server;
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

    let config = build_config(&cli.pipeline)?;

    match cli.command {
        Command::Serve {
            listen,
            body_limit_mb,
        } => {
            let pipeline = ConversionPipeline::from_config(config)
                .context("Failed to initialise the page renderer")?;
            server::serve(Arc::new(pipeline), listen, body_limit_mb * 1024 * 1024)
                .await
                .with_context(|| format!("Server on {listen} failed"))?;
        }

        Command::ImagesToPdf { images, output } => {
            let raw = images
                .iter()
                .map(|path| load_image(path))
                .collect::<Result<Vec<_>>>()?;
            let request = ConversionRequest::ImagesToDocument { images: raw };
            // Images never touch the renderer; skip binding it.
            let pipeline = with_progress(
                ConversionPipeline::new(config, Arc::new(NoRenderer)),
                show_progress,
                "Image",
            );
            run_to_file(&pipeline, request, &output, cli.quiet).await?;
        }

        Command::PdfToImages {
            input,
            output,
            format,
            scale,
            resolution,
        } => {
            if !input.is_file() {
                bail!("Input file not found: {}", input.display());
            }
            let options =
                config.raster_options(format.as_deref(), scale.as_deref(), resolution.as_deref());
            let pipeline = ConversionPipeline::from_config(config)
                .context("Failed to initialise the page renderer")?;
            let pipeline = with_progress(pipeline, show_progress, "Page");
            let request = ConversionRequest::DocumentToImages {
                document: DocumentSource::Borrowed(input),
                options,
            };
            run_to_file(&pipeline, request, &output, cli.quiet).await?;
        }
    }

    Ok(())
}

fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .renderer(args.renderer)
        .images_concurrency(args.images_concurrency)
        .pages_concurrency(args.pages_concurrency)
        .output_jpeg_quality(args.jpeg_quality)
        .max_rendered_pixels(args.max_pixels);
    if let Some(ref lib) = args.pdfium_library {
        builder = builder.pdfium_library(lib);
    }
    if let Some(ref root) = args.scratch_root {
        builder = builder.scratch_root(root);
    }
    builder.build().context("Invalid configuration")
}

fn with_progress(
    pipeline: ConversionPipeline,
    show_progress: bool,
    unit: &'static str,
) -> ConversionPipeline {
    if show_progress {
        let callback: ProgressCallback = CliProgressCallback::new(unit);
        pipeline.with_progress(callback)
    } else {
        pipeline
    }
}

fn load_image(path: &Path) -> Result<RawImage> {
    let name = path.to_string_lossy();
    let kind = ImageKind::from_extension(&name)
        .with_context(|| format!("{}: expected a .png, .jpg or .jpeg file", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(RawImage::from_bytes(kind, bytes))
}

async fn run_to_file(
    pipeline: &ConversionPipeline,
    request: ConversionRequest,
    output: &Path,
    quiet: bool,
) -> Result<()> {
    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let start = Instant::now();
    let artifact = pipeline.convert(request, &cancel).await?;
    let summary = describe(&artifact);
    write_artifact(artifact, output).await?;

    if !quiet {
        eprintln!(
            "{} Wrote {} → {}  {}",
            green("✔"),
            summary,
            bold(&output.display().to_string()),
            dim(&format!("{:.1}s", start.elapsed().as_secs_f64())),
        );
    }
    Ok(())
}

fn describe(artifact: &OutputArtifact) -> String {
    match artifact {
        OutputArtifact::Single { bytes, mime, .. } => format!("{} ({} bytes)", mime, bytes.len()),
        OutputArtifact::Archive { entries } => format!("zip of {} pages", entries.len()),
    }
}

/// Placeholder renderer for images→document, which never rasterises.
struct NoRenderer;

impl pagemill::PageRenderer for NoRenderer {
    fn name(&self) -> &'static str {
        "none"
    }

    fn page_count(&self, _document: &Path) -> Result<usize, pagemill::ConvertError> {
        Err(pagemill::ConvertError::RendererUnavailable {
            renderer: "none".into(),
            detail: "images-to-pdf does not render documents".into(),
        })
    }

    fn render_page(
        &self,
        _document: &Path,
        index: usize,
        _scale: f32,
        _scratch: &Path,
    ) -> Result<image::DynamicImage, pagemill::PageError> {
        Err(pagemill::PageError::Render {
            index,
            detail: "no renderer configured".into(),
        })
    }
}
