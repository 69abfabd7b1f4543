use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_viewer_cache::{apply_strategy, CacheConfig, CacheStrategy};
use pdf_viewer_core::{
    validate_document, DocumentSource, DownloadConfig, DownloadState, StreamingDownloader,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pdf-viewer-cli")]
#[command(about = "PDF viewer cache and download tools")]
pub struct Cli {
    /// Cache configuration file (key = value). Overrides PDF_VIEWER_* variables.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the cache folder name for a document URL or path.
    CacheId {
        #[arg(value_name = "SOURCE")]
        source: String,
    },
    /// Apply a cache strategy as if SOURCE were being opened.
    Prune {
        #[arg(value_name = "SOURCE")]
        source: String,
        /// Defaults to the configured cache root.
        #[arg(long)]
        cache_root: Option<PathBuf>,
        #[arg(long, default_value = "maximize")]
        strategy: String,
        #[arg(long)]
        max_documents: Option<usize>,
    },
    /// Check that a file looks like a PDF document.
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Download a remote document, reporting progress on stderr.
    Download {
        #[arg(value_name = "URL")]
        url: String,
        /// Defaults to a downloads folder next to the page cache.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Extra request header as NAME:VALUE. May be repeated.
        #[arg(long = "header", value_name = "NAME:VALUE")]
        headers: Vec<String>,
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
    /// Render one page to a PNG file.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 600)]
        width: u32,
        #[arg(long, default_value_t = 800)]
        height: u32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the effective cache configuration.
    Config {
        /// Also write it to this file.
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct CacheIdOutput {
    source: String,
    remote: bool,
    identifier: String,
}

#[derive(Debug, Serialize)]
struct PruneOutput {
    identifier: String,
    strategy: String,
    cache_root: String,
    removed: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ConfigOutput {
    heap_limit_mb: usize,
    memory_fraction: f64,
    bitmap_pool_fraction: f64,
    bitmap_pool_max_slots: usize,
    max_cached_documents: usize,
    cache_root: String,
    saved_to: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidateOutput {
    path: String,
    valid: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::CacheId { source } => run_cache_id(&source),
        Commands::Prune { source, cache_root, strategy, max_documents } => {
            run_prune(config, &source, cache_root, &strategy, max_documents)
        }
        Commands::Validate { file } => run_validate(&file),
        Commands::Download { url, dir, headers, attempts } => {
            let dir = dir.unwrap_or_else(CacheConfig::default_download_dir);
            run_download(&url, &dir, &headers, attempts)
        }
        Commands::Config { save } => run_config(config, save.as_deref()),
        Commands::Render { file, page, width, height, output } => {
            run_render(&file, page, width, height, output.as_deref())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_cache_id(source: &str) -> Result<()> {
    let parsed = DocumentSource::parse(source);
    let payload = CacheIdOutput {
        source: source.to_string(),
        remote: parsed.is_remote(),
        identifier: parsed.cache_identifier().to_string(),
    };
    print_json(&payload)
}

/// Cache configuration from `--config` when given, else the environment
fn load_cache_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => CacheConfig::from_env().context("invalid cache configuration"),
    }
}

fn run_config(path: Option<&Path>, save: Option<&Path>) -> Result<()> {
    let config = load_cache_config(path)?;
    if let Some(save) = save {
        config
            .save_to_file(save)
            .with_context(|| format!("failed to write configuration to {}", save.display()))?;
    }

    let payload = ConfigOutput {
        heap_limit_mb: config.heap_limit / (1024 * 1024),
        memory_fraction: config.memory_fraction,
        bitmap_pool_fraction: config.bitmap_pool_fraction,
        bitmap_pool_max_slots: config.bitmap_pool_max_slots,
        max_cached_documents: config.max_cached_documents,
        cache_root: config.cache_root.display().to_string(),
        saved_to: save.map(|path| path.display().to_string()),
    };
    print_json(&payload)
}

fn run_prune(
    config: Option<&Path>,
    source: &str,
    cache_root: Option<PathBuf>,
    strategy: &str,
    max_documents: Option<usize>,
) -> Result<()> {
    let strategy: CacheStrategy = strategy.parse()?;
    let config = load_cache_config(config)?;
    let cache_root = cache_root.unwrap_or(config.cache_root);
    let max_documents = max_documents.unwrap_or(config.max_cached_documents);
    let identifier = DocumentSource::parse(source).cache_identifier();

    let removed = apply_strategy(strategy, &cache_root, &identifier, max_documents)
        .with_context(|| format!("failed to prune {}", cache_root.display()))?;
    tracing::info!(%identifier, %strategy, removed = removed.len(), "cache pruned");

    let payload = PruneOutput {
        identifier: identifier.to_string(),
        strategy: strategy.to_string(),
        cache_root: cache_root.display().to_string(),
        removed: removed.iter().map(|path| path.display().to_string()).collect(),
    };
    print_json(&payload)
}

fn run_validate(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;
    validate_document(file)?;

    let payload = ValidateOutput { path: file.display().to_string(), valid: true };
    print_json(&payload)
}

fn run_download(url: &str, dir: &Path, headers: &[String], attempts: u32) -> Result<()> {
    let mut config = DownloadConfig::default();
    config.max_attempts = attempts.max(1);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("header must be NAME:VALUE, got {header}"))?;
        config = config.with_header(name.trim(), value.trim());
    }

    let source = DocumentSource::remote(url);
    let downloader = StreamingDownloader::new(config);
    let mut progress = Progress::default();
    let path = downloader
        .fetch(&source, dir, |state| progress.report(&state))
        .with_context(|| format!("failed to download {url}"))?;

    println!("{}", path.display());
    Ok(())
}

/// Throttles progress lines to one per 10% or per MiB when the size is unknown
#[derive(Default)]
struct Progress {
    last_step: Option<u64>,
}

impl Progress {
    fn report(&mut self, state: &DownloadState) {
        match state {
            DownloadState::NotStarted => {
                self.last_step = None;
                eprintln!("connecting");
            }
            DownloadState::InProgress { bytes_read, total_bytes } => {
                let step = match total_bytes {
                    Some(total) => bytes_read * 10 / total,
                    None => bytes_read / (1024 * 1024),
                };
                if self.last_step == Some(step) {
                    return;
                }
                self.last_step = Some(step);
                match total_bytes {
                    Some(total) => eprintln!("{bytes_read} / {total} bytes"),
                    None => eprintln!("{bytes_read} bytes"),
                }
            }
            DownloadState::Succeeded(path) => eprintln!("saved {}", path.display()),
            DownloadState::Failed(error) => eprintln!("{error}"),
        }
    }
}

#[cfg(feature = "pdfium")]
fn run_render(file: &Path, page: usize, width: u32, height: u32, output: Option<&Path>) -> Result<()> {
    use pdf_viewer_core::{PdfViewer, ViewerConfig};
    use pdf_viewer_render::PdfiumBackend;

    ensure_file_exists(file)?;
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }

    let backend = PdfiumBackend::new().context("failed to load PDFium")?;
    let config = ViewerConfig::default().with_cache_strategy(CacheStrategy::DisableCache);
    let viewer = PdfViewer::open_file(&backend, file, config).context("failed to open PDF")?;

    let outcome = viewer
        .request_page(page - 1, width, height, true)
        .wait()
        .context("render was cancelled")?;
    let bitmap = outcome
        .into_result()
        .context("failed to render page")?
        .context("render produced no bitmap")?;
    viewer.close()?;

    let image = image::RgbaImage::from_raw(bitmap.width(), bitmap.height(), bitmap.pixels().to_vec())
        .context("bitmap size does not match its pixel data")?;
    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_render_output(file, page));
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

#[cfg(not(feature = "pdfium"))]
fn run_render(file: &Path, _page: usize, _width: u32, _height: u32, _output: Option<&Path>) -> Result<()> {
    ensure_file_exists(file)?;
    anyhow::bail!("rendering requires PDFium; rebuild with --features pdfium")
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

#[cfg(feature = "pdfium")]
fn default_render_output(file: &Path, page: usize) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}

fn print_json<T: Serialize>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}
