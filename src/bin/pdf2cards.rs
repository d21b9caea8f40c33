//! CLI binary for edgequake-flashcards.
//!
//! A thin shim over the library crate: `submit` maps flags to
//! `PipelineConfig` and runs a job to completion, the other subcommands
//! operate on the job store directly and need no API key.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_flashcards::pipeline::{analyze, input};
use edgequake_flashcards::{
    build_vault, FlashcardError, Job, JobProgressCallback, JobService, JobStore, PipelineConfig,
    ProcessingStatus, ProgressCallback, StoreError,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per settled page. Pages settle out of
/// order, so elapsed times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    retries: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading deck…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            retries: AtomicUsize::new(0),
        })
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

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        text.to_string()
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, _job_id: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Synthesising");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Creating cards for {total_pages} slides…"))
        ));
    }

    fn on_item_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("slide {page_num}"));
    }

    fn on_item_retry(&self, page_num: usize, attempt: u32, delay: Duration) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Slide {:>3}  rate limited, retry {} in {:.1}s",
            yellow("↻"),
            page_num,
            attempt,
            delay.as_secs_f64()
        ));
    }

    fn on_item_complete(&self, page_num: usize, total_pages: usize, front: &str) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}  {}",
            green("✓"),
            page_num,
            total_pages,
            truncate(front, 60),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&truncate(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, _job_id: &str, total_pages: usize, completed: usize) {
        let failed = total_pages.saturating_sub(completed);
        self.bar.finish_and_clear();

        let retries = self.retries.load(Ordering::SeqCst);
        let retry_note = if retries > 0 {
            dim(&format!("  ({retries} rate-limit retries)"))
        } else {
            String::new()
        };
        if failed == 0 {
            eprintln!(
                "{} {} cards created{}",
                green("✔"),
                bold(&completed.to_string()),
                retry_note
            );
        } else {
            eprintln!(
                "{} {}/{} cards created  ({} failed){}",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&completed.to_string()),
                total_pages,
                red(&failed.to_string()),
                retry_note
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Turn a lecture deck into flashcards
  pdf2cards submit lecture-03.pdf

  # From a URL, with a specific model
  pdf2cards submit --model gpt-4.1-mini https://uni.example/slides/week1.pdf

  # Inspect and manage stored jobs
  pdf2cards list
  pdf2cards status 3f1c9a4e-...
  pdf2cards promote 3f1c9a4e-...
  pdf2cards delete 3f1c9a4e-...

  # Export an Obsidian vault
  pdf2cards export 3f1c9a4e-... -o week1-vault.zip

  # Vision models known to work (default marked *)
  pdf2cards models --provider anthropic

STORAGE:
  <storage-dir>/temp_storage/<job-id>/   every new job
  <storage-dir>/saved_storage/<job-id>/  after `promote`

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium (system library otherwise)
"#;

/// Turn PDF lecture decks into flashcards using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2cards",
    version,
    about = "Turn PDF lecture decks into flashcards using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Root directory holding temp_storage/ and saved_storage/.
    #[arg(long, global = true, env = "PDF2CARDS_STORAGE_DIR", default_value = ".")]
    storage_dir: PathBuf,

    /// Output jobs as JSON instead of a human summary.
    #[arg(long, global = true, env = "PDF2CARDS_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2CARDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2CARDS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a deck and process it to completion.
    Submit(SubmitArgs),
    /// Show one job.
    Status { id: String },
    /// List every stored job.
    List,
    /// Move a job to permanent storage.
    Promote { id: String },
    /// Delete a job from both storage tiers.
    Delete { id: String },
    /// Write a job's Obsidian vault ZIP.
    Export {
        id: String,
        /// Destination file. Default: `<deck>-obsidian-vault.zip`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List known vision models and the default one.
    Models {
        /// Only models of this provider.
        #[arg(long, env = "EDGEQUAKE_PROVIDER")]
        provider: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct SubmitArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Slides analysed at once.
    #[arg(short, long, env = "PDF2CARDS_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Retries per slide after a rate-limit response.
    #[arg(long, env = "PDF2CARDS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "PDF2CARDS_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// JPEG quality of rendered slides (1–100).
    #[arg(long, env = "PDF2CARDS_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2CARDS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per card.
    #[arg(long, env = "PDF2CARDS_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2CARDS_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2CARDS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-slide LLM call timeout in seconds.
    #[arg(long, env = "PDF2CARDS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Directory holding the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "PDF2CARDS_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `submit`.
    let show_progress = matches!(cli.command, Command::Submit(ref a) if !a.no_progress)
        && !cli.quiet
        && !cli.json;
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
        Command::Status { ref id } => {
            let store = open_store(&cli).await?;
            let job = store.get(id).await.map_err(FlashcardError::from)?;
            print_job(&cli, &job)
        }
        Command::List => {
            let store = open_store(&cli).await?;
            let mut jobs: Vec<Job> = store.list().collect().await;
            jobs.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&jobs).context("Failed to serialise jobs")?
                );
            } else if jobs.is_empty() {
                eprintln!("{}", dim("No stored jobs."));
            } else {
                for job in &jobs {
                    print_summary_line(job);
                }
            }
            Ok(())
        }
        Command::Promote { ref id } => {
            let store = open_store(&cli).await?;
            let job = store
                .promote(id)
                .await
                .map_err(FlashcardError::from)
                .context("Promotion failed")?;
            if !cli.quiet && !cli.json {
                eprintln!("{} {} saved permanently", green("✔"), bold(&job.filename));
            }
            if cli.json {
                print_job(&cli, &job)?;
            }
            Ok(())
        }
        Command::Delete { ref id } => {
            let store = open_store(&cli).await?;
            match store.delete(id).await {
                Ok(()) => {
                    if !cli.quiet {
                        eprintln!("{} deleted {}", green("✔"), id);
                    }
                    Ok(())
                }
                Err(StoreError::NotFound { .. }) => {
                    if !cli.quiet {
                        eprintln!("{} {} already deleted", dim("•"), id);
                    }
                    Ok(())
                }
                Err(e) => Err(FlashcardError::from(e)).context("Delete failed"),
            }
        }
        Command::Models { ref provider } => print_models(&cli, provider.as_deref()),
        Command::Export { ref id, ref output } => {
            let store = open_store(&cli).await?;
            let job = store.get(id).await.map_err(FlashcardError::from)?;
            let zip = build_vault(&job).context("Export failed")?;
            let path = output.clone().unwrap_or_else(|| {
                PathBuf::from(format!(
                    "{}-obsidian-vault.zip",
                    edgequake_flashcards::export::folder_name(&job)
                ))
            });
            tokio::fs::write(&path, &zip)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {} cards  →  {}",
                    green("✔"),
                    job.completed_cards().count(),
                    bold(&path.display().to_string())
                );
            }
            Ok(())
        }
    }
}

fn print_models(cli: &Cli, provider: Option<&str>) -> Result<()> {
    let models = analyze::list_models(provider);
    let default = provider.map_or(analyze::DEFAULT_MODEL, analyze::default_model_for);
    if cli.json {
        let body = serde_json::json!({ "models": models, "default": default });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).context("Failed to serialise models")?
        );
        return Ok(());
    }
    if models.is_empty() {
        eprintln!("{}", dim("No known vision models for this provider."));
        return Ok(());
    }
    for m in &models {
        let marker = if m.model == default { green("*") } else { " ".to_string() };
        println!("{} {:<10} {}", marker, m.provider, m.model);
    }
    Ok(())
}

async fn open_store(cli: &Cli) -> Result<JobStore> {
    JobStore::open(&cli.storage_dir)
        .await
        .with_context(|| format!("Failed to open job store at {}", cli.storage_dir.display()))
}

async fn submit(cli: &Cli, args: &SubmitArgs, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, args, progress).await?;

    let doc = input::load_document(&args.input, config.download_timeout_secs)
        .await
        .context("Failed to load document")?;
    let service = JobService::from_config(config)
        .await
        .context("Failed to start job service")?;

    let job = service
        .submit(&doc.name, doc.bytes)
        .await
        .context("Failed to submit document")?;
    service.wait_idle().await;

    let job = service.status(&job.id).await.context("Job disappeared")?;
    print_job(cli, &job)
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    cli: &Cli,
    args: &SubmitArgs,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .storage_dir(&cli.storage_dir)
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .max_rendered_pixels(args.max_pixels)
        .jpeg_quality(args.jpeg_quality)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .download_timeout_secs(args.download_timeout)
        .api_timeout_secs(args.api_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref lib) = args.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_job(cli: &Cli, job: &Job) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(job).context("Failed to serialise job")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    print_summary_line(job);
    for card in &job.cards {
        match card.status {
            ProcessingStatus::Completed => println!(
                "  {} {:>3}  {}",
                green("✓"),
                card.page_number,
                truncate(&card.front, 70)
            ),
            ProcessingStatus::Failed => println!(
                "  {} {:>3}  {}",
                red("✗"),
                card.page_number,
                red(&truncate(card.error.as_deref().unwrap_or("failed"), 70))
            ),
            _ => println!(
                "  {} {:>3}  {}",
                dim("…"),
                card.page_number,
                dim(&format!("{:?}", card.status).to_lowercase())
            ),
        }
    }
    Ok(())
}

fn print_summary_line(job: &Job) {
    let status = format!("{:?}", job.status).to_lowercase();
    let status = match job.status {
        ProcessingStatus::Completed => green(&status),
        ProcessingStatus::Failed => red(&status),
        _ => cyan(&status),
    };
    println!(
        "{}  {}  {}/{} cards  {}{}",
        dim(&job.id),
        bold(&job.filename),
        job.processed_slides,
        job.total_slides,
        status,
        if job.is_saved { dim("  [saved]") } else { String::new() },
    );
}
