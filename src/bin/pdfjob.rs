//! CLI binary for edgequake-pdfjob.
//!
//! A thin shim over the library crate: maps flags onto `WorkerConfig` /
//! `AnalyzerConfig`, runs submitted documents through a `Dispatcher`, and
//! reads job records back out of the store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edgequake_pdfjob::{
    AnalyzerConfig, Delivery, DispatchOutcome, Dispatcher, FileJobStore, FsPageStore, ImageFormat, JobId,
    JobQueue, JobRecord, JobStatus, JobStore, LifecycleController, LifecycleObserver,
    LlmVisionAnalyzer, PageStore, PdfiumRenderer, RetentionPolicy, WorkerConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
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

// ── Spinner observer ─────────────────────────────────────────────────────────

/// Prints one line per durable transition above a steady spinner.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new(jobs: usize) -> Arc<Self> {
        let bar = ProgressBar::new(jobs as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  {pos}/{len} jobs  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl LifecycleObserver for CliObserver {
    fn on_status(&self, job_id: &JobId, status: JobStatus) {
        self.bar.set_message(format!("{} {}", short(job_id), status.label()));
    }

    fn on_rendered(&self, job_id: &JobId, total_pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            cyan("◆"),
            short(job_id),
            dim(&format!("{total_pages} pages rendered")),
        ));
    }

    fn on_processed(&self, job_id: &JobId, result_len: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            short(job_id),
            dim(&format!("{result_len} chars")),
        ));
    }

    fn on_failed(&self, job_id: &JobId, error: &str) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), short(job_id), error));
    }

    fn on_acknowledged(&self, job_id: &JobId, outcome: &DispatchOutcome) {
        let note = match outcome {
            DispatchOutcome::AlreadyTerminal(status) => Some(format!("already {}", status.label())),
            DispatchOutcome::AlreadyInFlight => Some("running elsewhere".to_string()),
            DispatchOutcome::DeadLettered => Some("gave up after retries".to_string()),
            DispatchOutcome::Processed | DispatchOutcome::Failed(_) => None,
        };
        if let Some(note) = note {
            self.bar
                .println(format!("  {} {}  {}", dim("·"), short(job_id), dim(&note)));
        }
        self.bar.inc(1);
    }
}

fn short(id: &JobId) -> String {
    id.as_str().chars().take(8).collect()
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse one résumé (prints the result)
  pdfjob submit resume.pdf

  # Several documents, 8 at a time, pages purged after success
  pdfjob submit --concurrency 8 --retention purge-on-success a.pdf b.pdf c.pdf

  # Read a record back
  pdfjob status 0b6f0c1e-5c1a-4f5e-9d43-3c1b8f0a2d11 --json

  # Delete a job's rendered pages
  pdfjob purge 0b6f0c1e-5c1a-4f5e-9d43-3c1b8f0a2d11

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key (default provider)
  ANTHROPIC_API_KEY        Anthropic API key
  GEMINI_API_KEY           Google Gemini API key
  PDFJOB_STORE_DIR         Job record directory (default: data/jobs)
  PDFJOB_IMAGE_ROOT        Rendered page directory (default: data/images)
  PDFJOB_PDFIUM_LIB_PATH   Directory containing libpdfium
"#;

/// Background PDF analysis jobs: render pages, ask a vision LLM, track status.
#[derive(Parser, Debug)]
#[command(
    name = "pdfjob",
    version,
    about = "Render PDFs to page images, analyse them with a vision LLM, and track each job",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory holding one JSON record per job.
    #[arg(long, global = true, env = "PDFJOB_STORE_DIR", default_value = "data/jobs")]
    store_dir: PathBuf,

    /// Root directory for rendered page images.
    #[arg(long, global = true, env = "PDFJOB_IMAGE_ROOT", default_value = "data/images")]
    image_root: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFJOB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, global = true, env = "PDFJOB_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create jobs for PDF files and process them to completion.
    Submit(SubmitArgs),

    /// Print a job record.
    Status {
        /// Job id.
        id: String,

        /// Print the raw record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a job's rendered page images.
    Purge {
        /// Job id.
        id: String,
    },
}

#[derive(clap::Args, Debug)]
struct SubmitArgs {
    /// PDF files to process.
    #[arg(required = true)]
    pdfs: Vec<PathBuf>,

    /// Job id to use (single file only). Default: a random UUID.
    #[arg(long)]
    id: Option<String>,

    /// LLM provider: openai, anthropic, gemini, azure, mistral, ollama.
    #[arg(long, env = "PDFJOB_PROVIDER", default_value = "openai")]
    provider: String,

    /// Vision model id.
    #[arg(long, env = "PDFJOB_MODEL", default_value = "gpt-4.1-nano")]
    model: String,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFJOB_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max LLM output tokens for a document.
    #[arg(long, env = "PDFJOB_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Vision call timeout in seconds.
    #[arg(long, env = "PDFJOB_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file with the instruction sent alongside the pages.
    #[arg(long, env = "PDFJOB_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Jobs processed at the same time.
    #[arg(short, long, env = "PDFJOB_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Delivery attempts before a job is dead-lettered.
    #[arg(long, env = "PDFJOB_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Initial redelivery backoff in milliseconds.
    #[arg(long, env = "PDFJOB_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Longest edge of a rendered page in pixels.
    #[arg(long, env = "PDFJOB_MAX_PIXELS", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=10000))]
    max_pixels: u32,

    /// Stored page image format.
    #[arg(long, env = "PDFJOB_IMAGE_FORMAT", value_enum, default_value = "png")]
    image_format: FormatArg,

    /// When rendered pages are deleted.
    #[arg(long, env = "PDFJOB_RETENTION", value_enum, default_value = "keep")]
    retention: RetentionArg,

    /// Directory containing libpdfium. Default: system library path.
    #[arg(long, env = "PDFJOB_PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Print final records as JSON instead of the result text.
    #[arg(long)]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "PDFJOB_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Png,
    Jpeg,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Png => ImageFormat::Png,
            FormatArg::Jpeg => ImageFormat::Jpeg,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum RetentionArg {
    Keep,
    PurgeOnSuccess,
    PurgeOnTerminal,
}

impl From<RetentionArg> for RetentionPolicy {
    fn from(v: RetentionArg) -> Self {
        match v {
            RetentionArg::Keep => RetentionPolicy::Keep,
            RetentionArg::PurgeOnSuccess => RetentionPolicy::PurgeOnSuccess,
            RetentionArg::PurgeOnTerminal => RetentionPolicy::PurgeOnTerminal,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters during `submit`, so
    // library INFO logs are only shown when asked for.
    let show_progress = matches!(&cli.command, Command::Submit(a) if !a.no_progress && !a.json)
        && !cli.quiet;
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

    match cli.command {
        Command::Submit(ref args) => submit(&cli, args, show_progress).await,
        Command::Status { ref id, json } => status(&cli, id, json).await,
        Command::Purge { ref id } => purge(&cli, id).await,
    }
}

// ── submit ───────────────────────────────────────────────────────────────────

async fn submit(cli: &Cli, args: &SubmitArgs, show_progress: bool) -> Result<()> {
    if args.id.is_some() && args.pdfs.len() > 1 {
        bail!("--id can only be used with a single PDF");
    }

    let mut builder = WorkerConfig::builder()
        .store_dir(&cli.store_dir)
        .image_root(&cli.image_root)
        .image_format(args.image_format.clone().into())
        .max_rendered_pixels(args.max_pixels)
        .concurrency(args.concurrency)
        .max_attempts(args.max_attempts)
        .retry_backoff_ms(args.retry_backoff_ms)
        .retention(args.retention.clone().into());
    if let Some(ref dir) = args.pdfium_lib_path {
        builder = builder.pdfium_lib_path(dir);
    }
    if let Some(ref path) = args.instruction {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read instruction file: {}", path.display()))?;
        builder = builder.instruction(text);
    }
    let config = builder.build().context("Invalid worker configuration")?;

    let analyzer_config = AnalyzerConfig {
        provider: args.provider.clone(),
        model: args.model.clone(),
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        timeout_secs: args.api_timeout,
    };
    let analyzer = Arc::new(
        LlmVisionAnalyzer::from_config(analyzer_config)
            .context("Failed to set up the vision model")?,
    );

    let store: Arc<dyn JobStore> = Arc::new(
        FileJobStore::open(&config.store_dir)
            .await
            .context("Failed to open job store")?,
    );
    let pages: Arc<dyn PageStore> =
        Arc::new(FsPageStore::new(&config.image_root, config.image_format));
    let renderer = Arc::new(PdfiumRenderer::from_config(&config, Arc::clone(&pages)));

    let observer = show_progress.then(|| CliObserver::new(args.pdfs.len()));
    let mut controller =
        LifecycleController::from_config(&config, Arc::clone(&store), renderer, analyzer);
    if let Some(ref o) = observer {
        controller = controller.with_observer(Arc::clone(o) as Arc<dyn LifecycleObserver>);
    }
    let mut dispatcher = Dispatcher::from_config(&config, controller, pages);
    if let Some(ref o) = observer {
        dispatcher = dispatcher.with_observer(Arc::clone(o) as Arc<dyn LifecycleObserver>);
    }

    let mut deliveries = Vec::with_capacity(args.pdfs.len());
    for pdf in &args.pdfs {
        let source = std::fs::canonicalize(pdf)
            .with_context(|| format!("PDF not found: {}", pdf.display()))?;
        let job_id = match args.id {
            Some(ref id) => JobId::parse(id).context("Invalid --id")?,
            None => JobId::generate(),
        };
        store
            .create(&job_id, &source)
            .await
            .with_context(|| format!("Failed to create job for {}", pdf.display()))?;
        if !cli.quiet && !args.json {
            eprintln!("{} {}  {}", cyan("◆"), bold(job_id.as_str()), dim(&source.display().to_string()));
        }
        deliveries.push(Delivery::new(job_id, source));
    }

    let (queue, receiver) = JobQueue::channel(config.concurrency * 2);
    let producer = {
        let deliveries = deliveries.clone();
        tokio::spawn(async move {
            for delivery in deliveries {
                queue.enqueue(delivery).await?;
            }
            Ok::<_, edgequake_pdfjob::JobError>(())
        })
    };
    let report = dispatcher.run_queue(receiver).await;
    producer
        .await
        .context("Producer task panicked")?
        .context("Failed to queue jobs")?;
    if let Some(ref o) = observer {
        o.finish();
    }

    let mut records = Vec::with_capacity(deliveries.len());
    for delivery in &deliveries {
        records.push(store.get(&delivery.job_id).await?);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            print_result(record);
        }
    }

    for dead in dispatcher.take_dead_letters() {
        eprintln!(
            "{} {} gave up after {} attempts: {}",
            red("✘"),
            bold(dead.delivery.job_id.as_str()),
            dead.attempts,
            dead.error
        );
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} jobs processed",
            if report.succeeded == report.total() {
                green("✔")
            } else {
                red("✘")
            },
            bold(&report.succeeded.to_string()),
            report.total()
        );
    }

    if report.succeeded < report.total() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(record: &JobRecord) {
    match record.status {
        JobStatus::Processed => {
            println!("# {}\n", record.id);
            println!("{}\n", record.result.as_deref().unwrap_or_default());
        }
        _ => eprintln!(
            "{} {}  {}: {}",
            red("✗"),
            bold(record.id.as_str()),
            record.status.label(),
            record.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

// ── status ───────────────────────────────────────────────────────────────────

async fn status(cli: &Cli, id: &str, json: bool) -> Result<()> {
    let job_id = JobId::parse(id).context("Invalid job id")?;
    let store = FileJobStore::open(&cli.store_dir)
        .await
        .context("Failed to open job store")?;
    let record = store
        .get(&job_id)
        .await
        .with_context(|| format!("No job '{}' in {}", id, cli.store_dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("{:<16}{}", bold("Job:"), record.id);
    println!("{:<16}{}", bold("Source:"), record.source_path.display());
    println!("{:<16}{}", bold("Status:"), record.status.label());
    if let Some(n) = record.total_pages {
        println!("{:<16}{}", bold("Pages:"), n);
    }
    if let Some(n) = record.processed_pages {
        println!("{:<16}{}", bold("Analysed:"), n);
    }
    println!("{:<16}{}", bold("Created:"), record.created_at.to_rfc3339());
    println!("{:<16}{}", bold("Updated:"), record.updated_at.to_rfc3339());
    if let Some(ref error) = record.error {
        println!("{:<16}{}", bold("Error:"), red(error));
    }
    if let Some(ref result) = record.result {
        println!("\n{}", result);
    }
    Ok(())
}

// ── purge ────────────────────────────────────────────────────────────────────

async fn purge(cli: &Cli, id: &str) -> Result<()> {
    let job_id = JobId::parse(id).context("Invalid job id")?;
    // Format only affects writes; purge removes the whole job directory.
    let pages = FsPageStore::new(&cli.image_root, ImageFormat::default());
    let removed = tokio::task::spawn_blocking(move || pages.purge(&job_id))
        .await
        .context("Purge task panicked")?
        .context("Failed to purge page images")?;

    if !cli.quiet {
        if removed {
            eprintln!("{} Removed page images for {}", green("✔"), bold(id));
        } else {
            eprintln!("{} No page images for {}", dim("·"), bold(id));
        }
    }
    Ok(())
}
