//! CLI binary for book-processor.
//!
//! A thin shim over the library crate: each subcommand maps its flags to an
//! `ExtractConfig` / `PublishConfig`, runs one library call and prints the
//! result.

use anyhow::{bail, Context, Result};
use book_processor::publish::{HttpObjectStore, LocalObjectStore, MemoryStore, ObjectStore, RedisStore, StatusStore};
use book_processor::{
    build_mind_map, convert, first_line_title, structure_markdown, Coordinator, ExtractConfig,
    ExtractionOutput, ExtractionProgressCallback, OutputLayout, ProgressCallback, PublishConfig,
    PublishOutcome, SourceFormat, TaskKind,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Progress bar over chapters (EPUB) or pages (PDF).
struct CliProgressCallback {
    bar: ProgressBar,
    unit: &'static str,
    asset_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Opening");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            unit,
            asset_errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_units: usize) {
        let template = format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {}  ⏱ {{elapsed_precise}}",
            self.unit
        );
        self.bar.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
        );
        self.bar.set_length(total_units as u64);
        self.bar.set_prefix("Extracting");
    }

    fn on_unit_complete(&self, unit: usize, total_units: usize, markdown_len: usize) {
        if markdown_len == 0 {
            self.bar.println(format!(
                "  {} {:>3}/{:<3}  {}",
                dim("·"),
                unit,
                total_units,
                dim("empty")
            ));
        }
        self.bar.inc(1);
    }

    fn on_asset_error(&self, reference: &str, error: &str) {
        self.asset_errors.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), reference, red(error)));
    }

    fn on_extraction_complete(&self, total_units: usize, asset_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.asset_errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} {} extracted, {} images written{}",
            if failed == 0 { green("✔") } else { red("⚠") },
            bold(&total_units.to_string()),
            self.unit,
            asset_count,
            if failed == 0 {
                String::new()
            } else {
                format!(", {} failed", red(&failed.to_string()))
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # EPUB to Markdown on stdout (product code from the file name)
  book-processor epub 100227-01.epub

  # PDF from a URL, saved under ./data/100227-01/
  book-processor pdf --save --product-code 100227-01 https://cdn.example.org/book.pdf

  # Extract, save and publish in one go
  book-processor epub --save --publish 100227-01.epub

  # Outline JSON of a Markdown file
  book-processor outline data/100227-01/epub/100227-01.epub.md --product-code 100227-01 --save

  # Mind map of the headings
  book-processor mindmap book.md --root-name "My Book"

  # Task status
  book-processor status 100227-01

ENVIRONMENT VARIABLES:
  BOOK_DATA_ROOT    Root of the per-product output tree (default ./data)
  REDIS_URL         Lock/status store; in-process store when unset
  OSS_ENDPOINT      Object store endpoint (PUT <endpoint>/<bucket>/<key>)
  OSS_BUCKET        Object store bucket
  OSS_TOKEN         Bearer token for the object store
  OSS_BASE_PATH     Remote prefix for product directories (default books)
  PDFIUM_LIB_PATH   Path to libpdfium (file or directory)
  RUST_LOG          Log filter, overrides --verbose / --quiet
"#;

/// Extract EPUB and PDF books to Markdown and publish them.
#[derive(Parser, Debug)]
#[command(
    name = "book-processor",
    version,
    about = "Extract EPUB/PDF books to Markdown, outline them, and publish per-product output",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BOOK_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "BOOK_NO_PROGRESS")]
    no_progress: bool,

    /// Root of the per-product output tree.
    #[arg(long, global = true, env = "BOOK_DATA_ROOT", default_value = "./data")]
    data_root: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an EPUB (path or URL) to Markdown.
    Epub(ExtractArgs),
    /// Convert a PDF (path or URL) to Markdown.
    Pdf(ExtractArgs),
    /// Build the heading outline JSON of a Markdown file.
    Outline(OutlineArgs),
    /// Build a heading mind map of a Markdown file.
    Mindmap(MindMapArgs),
    /// Publish an existing product directory.
    Publish(PublishCommandArgs),
    /// Show task records of a product.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local file path or HTTP/HTTPS URL.
    input: String,

    /// Product code; derived from the file name when omitted.
    #[arg(long)]
    product_code: Option<String>,

    /// Keep images and Markdown under the data root.
    #[arg(long)]
    save: bool,

    /// Public path prefix for image references.
    #[arg(long, env = "BOOK_PUBLIC_PREFIX")]
    public_prefix: Option<String>,

    /// Do not prepend the title/author header.
    #[arg(long)]
    no_header: bool,

    /// Also write the Markdown to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the full extraction result as JSON instead of Markdown.
    #[arg(long)]
    json: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "BOOK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Publish the product directory afterwards (requires --save).
    #[arg(long)]
    publish: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug)]
struct OutlineArgs {
    /// Markdown file to outline.
    markdown: PathBuf,

    /// Product code; required with --save.
    #[arg(long)]
    product_code: Option<String>,

    /// Write `<root>/<product>/json/<product>.structure.json`.
    #[arg(long)]
    save: bool,

    /// Publish the product directory afterwards (requires --save).
    #[arg(long)]
    publish: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug)]
struct MindMapArgs {
    /// Markdown file to read headings from.
    markdown: PathBuf,

    /// Name of the root node; defaults to the first line of the file.
    #[arg(long)]
    root_name: Option<String>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PublishCommandArgs {
    product_code: String,

    /// Task the publication is recorded under.
    #[arg(long, value_enum)]
    task: TaskArg,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug)]
struct StatusArgs {
    product_code: String,

    /// Show only this task.
    #[arg(long, value_enum)]
    task: Option<TaskArg>,

    #[command(flatten)]
    store: StoreArgs,
}

/// Lock/status store and object store settings.
#[derive(Args, Debug, Clone)]
struct StoreArgs {
    /// Redis URL for locks and task records.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Object store endpoint.
    #[arg(long, env = "OSS_ENDPOINT")]
    oss_endpoint: Option<String>,

    /// Object store bucket.
    #[arg(long, env = "OSS_BUCKET")]
    oss_bucket: Option<String>,

    /// Object store bearer token.
    #[arg(long, env = "OSS_TOKEN", hide_env_values = true)]
    oss_token: Option<String>,

    /// Remote prefix for product directories.
    #[arg(long, env = "OSS_BASE_PATH", default_value = "books")]
    oss_base_path: String,

    /// Mirror uploads into this directory instead of an HTTP store.
    #[arg(long, env = "BOOK_MIRROR_DIR")]
    mirror_dir: Option<PathBuf>,

    /// Seconds to wait for sibling tasks when the product lock is taken.
    #[arg(long, env = "BOOK_WAIT_TIMEOUT", default_value_t = 3600)]
    wait_timeout: u64,

    /// Never publish; keep everything local.
    #[arg(long, env = "BOOK_LOCAL_MODE")]
    local_mode: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TaskArg {
    EpubToMd,
    PdfToMd,
    MdToJsonStructure,
}

impl From<TaskArg> for TaskKind {
    fn from(v: TaskArg) -> Self {
        match v {
            TaskArg::EpubToMd => TaskKind::EpubToMd,
            TaskArg::PdfToMd => TaskKind::PdfToMd,
            TaskArg::MdToJsonStructure => TaskKind::MdToJsonStructure,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose asks for them.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    match &cli.command {
        Command::Epub(args) => run_extract(&cli, args, SourceFormat::Epub, show_progress).await,
        Command::Pdf(args) => run_extract(&cli, args, SourceFormat::Pdf, show_progress).await,
        Command::Outline(args) => run_outline(&cli, args).await,
        Command::Mindmap(args) => run_mind_map(args).await,
        Command::Publish(args) => run_publish(&cli, args).await,
        Command::Status(args) => run_status(args).await,
    }
}

async fn run_extract(
    cli: &Cli,
    args: &ExtractArgs,
    format: SourceFormat,
    show_progress: bool,
) -> Result<()> {
    if args.publish && !args.save {
        bail!("--publish requires --save");
    }

    let progress: Option<ProgressCallback> = show_progress.then(|| {
        let unit = match format {
            SourceFormat::Epub => "chapters",
            SourceFormat::Pdf => "pages",
        };
        CliProgressCallback::new(unit) as Arc<dyn ExtractionProgressCallback>
    });

    let mut builder = ExtractConfig::builder()
        .data_root(cli.data_root.clone())
        .save(args.save)
        .include_metadata_header(!args.no_header)
        .download_timeout_secs(args.download_timeout);
    if let Some(prefix) = &args.public_prefix {
        builder = builder.public_prefix(prefix.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let output = convert(&args.input, format, args.product_code.as_deref(), &config)
        .await
        .with_context(|| format!("Extraction of '{}' failed", args.input))?;

    if let Some(path) = &args.output {
        tokio::fs::write(path, &output.markdown)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_output(&output, args.json, args.output.is_some())?;

    if !cli.quiet {
        eprintln!(
            "{}  product {}  {}/{} units  {} images  {}ms",
            if output.asset_errors.is_empty() {
                green("✔")
            } else {
                red("⚠")
            },
            bold(&output.product_code),
            output.stats.rendered_units,
            output.stats.total_units,
            output.stats.assets_written,
            output.stats.total_duration_ms,
        );
        if let Some(path) = &output.markdown_path {
            eprintln!("   {}", dim(&path.display().to_string()));
        }
    }

    if args.publish {
        let task = match format {
            SourceFormat::Epub => TaskKind::EpubToMd,
            SourceFormat::Pdf => TaskKind::PdfToMd,
        };
        let layout = config.layout();
        publish(&args.store, &layout, &output.product_code, task).await?;
    }
    Ok(())
}

fn print_output(output: &ExtractionOutput, json: bool, written_to_file: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }
    if written_to_file {
        return Ok(());
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(output.markdown.as_bytes())
        .context("Failed to write to stdout")?;
    Ok(())
}

async fn run_outline(cli: &Cli, args: &OutlineArgs) -> Result<()> {
    if args.publish && !args.save {
        bail!("--publish requires --save");
    }
    let markdown = read_markdown(&args.markdown).await?;
    let code = match (&args.product_code, args.save) {
        (Some(code), _) => code.clone(),
        (None, false) => String::new(),
        (None, true) => book_processor::product_code_from_filename(&args.markdown)
            .context("--save needs --product-code (or a file named like 100227-01.*)")?,
    };

    let layout = OutputLayout::new(&cli.data_root);
    let (json, path) = structure_markdown(&markdown, &code, &layout, args.save)
        .context("Failed to build outline")?;
    match path {
        Some(path) if !cli.quiet => eprintln!("{} {}", green("✔"), path.display()),
        Some(_) => {}
        None => println!("{json}"),
    }

    if args.publish {
        publish(&args.store, &layout, &code, TaskKind::MdToJsonStructure).await?;
    }
    Ok(())
}

async fn run_mind_map(args: &MindMapArgs) -> Result<()> {
    let markdown = read_markdown(&args.markdown).await?;
    let root_name = args
        .root_name
        .clone()
        .or_else(|| first_line_title(&markdown))
        .unwrap_or_else(|| "root".to_string());

    let map = build_mind_map(&markdown, &root_name);
    let json = serde_json::to_string_pretty(&map).context("Failed to serialise mind map")?;
    match &args.output {
        Some(path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

async fn run_publish(cli: &Cli, args: &PublishCommandArgs) -> Result<()> {
    let layout = OutputLayout::new(&cli.data_root);
    publish(&args.store, &layout, &args.product_code, args.task.into()).await
}

async fn run_status(args: &StatusArgs) -> Result<()> {
    let coordinator = build_coordinator(&args.store, false).await?;
    let tasks: Vec<TaskKind> = match args.task {
        Some(task) => vec![task.into()],
        None => vec![TaskKind::EpubToMd, TaskKind::PdfToMd, TaskKind::MdToJsonStructure],
    };
    for task in tasks {
        match coordinator
            .get_status(&args.product_code, task)
            .await
            .context("Status store query failed")?
        {
            Some(record) => println!(
                "{:<22} {:<8} {}  {}",
                task.as_str(),
                record.status.as_str(),
                dim(&record.updated_at.to_rfc3339()),
                record.message
            ),
            None => println!("{:<22} {}", task.as_str(), dim("-")),
        }
    }
    Ok(())
}

async fn read_markdown(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn publish(
    args: &StoreArgs,
    layout: &OutputLayout,
    product_code: &str,
    task: TaskKind,
) -> Result<()> {
    let coordinator = build_coordinator(args, true).await?;
    let product_dir = layout.product_dir(product_code);
    match coordinator.publish(product_code, task, &product_dir).await {
        PublishOutcome::Published => {
            eprintln!("{} published {}", green("✔"), bold(product_code));
            Ok(())
        }
        PublishOutcome::Skipped => {
            eprintln!("{} local mode, {} not published", dim("·"), product_code);
            Ok(())
        }
        PublishOutcome::Failed(e) => Err(anyhow::Error::new(e)
            .context(format!("Publication of {product_code} failed"))),
    }
}

/// Wire the status store and object store from flags/env.
async fn build_coordinator(args: &StoreArgs, needs_objects: bool) -> Result<Coordinator> {
    let store: Arc<dyn StatusStore> = match &args.redis_url {
        Some(url) => Arc::new(
            RedisStore::connect(url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            warn!("REDIS_URL not set; using an in-process status store");
            Arc::new(MemoryStore::new())
        }
    };

    let objects: Arc<dyn ObjectStore> = match (&args.oss_endpoint, &args.mirror_dir) {
        (Some(endpoint), _) => {
            let bucket = args
                .oss_bucket
                .clone()
                .context("OSS_BUCKET is required with OSS_ENDPOINT")?;
            Arc::new(
                HttpObjectStore::new(endpoint.clone(), bucket, args.oss_token.clone())
                    .context("Failed to build HTTP client")?,
            )
        }
        (None, Some(dir)) => Arc::new(LocalObjectStore::new(dir.clone())),
        (None, None) if needs_objects && !args.local_mode => {
            bail!("No object store configured: set OSS_ENDPOINT or --mirror-dir")
        }
        (None, None) => Arc::new(LocalObjectStore::new(PathBuf::from("."))),
    };

    let config = PublishConfig::builder()
        .remote_base_path(args.oss_base_path.clone())
        .wait_timeout(Duration::from_secs(args.wait_timeout))
        .local_mode(args.local_mode)
        .build()
        .context("Invalid publish configuration")?;

    Ok(Coordinator::new(store, objects, config))
}
