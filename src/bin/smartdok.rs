//! CLI binary for smartdok.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! loads the catalog and reports per-document results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use smartdok::{
    load_catalog, process_batch, resolve_file, BatchProgressCallback, Catalog, CatalogManifest, DocumentSummary,
    EntityCategory, MatchKind, Pipeline, PipelineConfig, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch plus a log line per finished document. Documents
/// finish out of order, so start times are keyed by input index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Tagging");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.reset_eta();
    }

    fn on_document_start(&self, index: usize, _total: usize, path: &str) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(path.to_string());
    }

    fn on_document_complete(&self, index: usize, _total: usize, path: &str, markers: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            path,
            dim(&format!("{markers:>4} markers")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, _total: usize, path: &str, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            path,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_documents: usize, _success_count: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tag and resolve every markdown file in a directory
  smartdok run --data-dir data/ konsesjoner/

  # Tag only (writes .sd files next to the input)
  smartdok tag konsesjon.md

  # Re-resolve earlier tagging with a stricter threshold, no LLM calls
  smartdok resolve --data-dir data/ --threshold 0.9 konsesjon.sd

  # Look a name up in the catalog
  smartdok lookup --data-dir data/ --category river "Glåma"

  # Custom datasets
  smartdok run --catalog catalog.json konsesjon.md

OUTPUT FILES (per input document <name>):
  <name>.sd            tagged text with unresolved markers
  <name>.report.json   resolution report (counts, problem markers, warnings)
  <name>.nsd           smart document with resolved tags, written last

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  SMARTDOK_DATA_DIR       Directory holding the NVE datasets
  SMARTDOK_CATALOG        Catalog manifest (JSON)
  SMARTDOK_OUTPUT_DIR     Write outputs here instead of next to the input
"#;

/// Tag hydropower entities in NVE concession documents and resolve them.
#[derive(Parser, Debug)]
#[command(
    name = "smartdok",
    version,
    about = "Tag hydropower entities in NVE concession documents and resolve them against NVE datasets",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SMARTDOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SMARTDOK_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "SMARTDOK_NO_PROGRESS")]
    no_progress: bool,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tag documents with the LLM and write `.sd` files.
    Tag {
        /// Files or directories (`.md` and `.txt` are picked up).
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        llm: LlmArgs,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Resolve already tagged `.sd` files against the catalog.
    Resolve {
        /// Files or directories (`.sd` is picked up).
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        catalog: CatalogArgs,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Tag and resolve documents.
    Run {
        /// Files or directories (`.md` and `.txt` are picked up).
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        catalog: CatalogArgs,
        #[command(flatten)]
        llm: LlmArgs,
        #[command(flatten)]
        out: OutputArgs,
    },
    /// Look a name up in the catalog.
    Lookup {
        name: String,
        /// river, lake, facility, dam or waterway (Norwegian tags work too).
        #[arg(short = 'k', long, value_parser = parse_category)]
        category: EntityCategory,
        #[command(flatten)]
        catalog: CatalogArgs,
    },
}

#[derive(Args, Debug)]
struct CatalogArgs {
    /// Catalog manifest listing datasets (JSON).
    #[arg(long, env = "SMARTDOK_CATALOG", conflicts_with = "data_dir")]
    catalog: Option<PathBuf>,

    /// Directory with the standard NVE dataset exports.
    #[arg(long, env = "SMARTDOK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Minimum similarity (0.0–1.0) for a fuzzy match.
    #[arg(long, env = "SMARTDOK_THRESHOLD", default_value_t = smartdok::catalog::DEFAULT_FUZZY_THRESHOLD)]
    threshold: f64,

    /// Candidates kept per lookup (more are kept when tied at the top).
    #[arg(long, env = "SMARTDOK_MAX_CANDIDATES", default_value_t = smartdok::catalog::DEFAULT_MAX_CANDIDATES)]
    max_candidates: usize,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of documents tagged concurrently.
    #[arg(short, long, env = "SMARTDOK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Categories to tag (comma separated). Default: all.
    #[arg(long, env = "SMARTDOK_CATEGORIES", value_delimiter = ',', value_parser = parse_category)]
    categories: Vec<EntityCategory>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "SMARTDOK_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per chunk.
    #[arg(long, env = "SMARTDOK_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SMARTDOK_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per chunk on LLM failure.
    #[arg(long, env = "SMARTDOK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "SMARTDOK_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Largest chunk, in characters, sent in one call.
    #[arg(long, env = "SMARTDOK_MAX_CHUNK_CHARS", default_value_t = 12_000)]
    max_chunk_chars: usize,

    /// Tag again even when a `.sd` file already exists.
    #[arg(long, env = "SMARTDOK_FORCE")]
    force: bool,

    /// Do not keep the `.sd` intermediate.
    #[arg(long)]
    no_intermediate: bool,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Write outputs here instead of next to each input.
    #[arg(short, long, env = "SMARTDOK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

fn parse_category(s: &str) -> Result<EntityCategory, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Tag { inputs, llm, out } => run_tag(&cli, inputs, llm, out).await,
        Command::Resolve { inputs, catalog, out } => run_resolve(&cli, inputs, catalog, out).await,
        Command::Run {
            inputs,
            catalog,
            llm,
            out,
        } => run_pipeline(&cli, inputs, catalog, llm, out, show_progress).await,
        Command::Lookup { name, category, catalog } => run_lookup(&cli, name, *category, catalog).await,
    }
}

async fn run_tag(cli: &Cli, inputs: &[PathBuf], llm: &LlmArgs, out: &OutputArgs) -> Result<()> {
    let files = collect_inputs(inputs, &["md", "txt"])?;
    let config = build_config(Some(llm), None, out, None).await?;
    // Tagging never consults the catalog.
    let empty = Arc::new(Catalog::from_records(Vec::new(), config.match_options()));
    let pipeline = Pipeline::from_config(config, empty).context("Failed to set up the LLM provider")?;

    let mut failed = 0;
    for file in &files {
        match pipeline.tag_file(file).await {
            Ok((path, tagged)) => {
                if !cli.quiet {
                    eprintln!(
                        "{} {}  {}  →  {}",
                        green("✓"),
                        file.display(),
                        dim(&format!("{} markers", tagged.markers().len())),
                        bold(&path.display().to_string())
                    );
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}  {}", red("✗"), file.display(), red(&e.to_string()));
            }
        }
    }
    finish(failed, files.len())
}

async fn run_resolve(cli: &Cli, inputs: &[PathBuf], catalog_args: &CatalogArgs, out: &OutputArgs) -> Result<()> {
    let files = collect_inputs(inputs, &["sd"])?;
    let config = build_config(None, Some(catalog_args), out, None).await?;
    let catalog = open_catalog(catalog_args, &config).await?;

    let mut summaries = Vec::new();
    let mut failed = 0;
    for file in &files {
        match resolve_file(file, &catalog, &config).await {
            Ok(summary) => {
                if !cli.quiet && !cli.json {
                    print_summary(&summary);
                }
                summaries.push(summary);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}  {}", red("✗"), file.display(), red(&e.to_string()));
            }
        }
    }
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).context("Failed to serialise summaries")?
        );
    }
    finish(failed, files.len())
}

async fn run_pipeline(
    cli: &Cli,
    inputs: &[PathBuf],
    catalog_args: &CatalogArgs,
    llm: &LlmArgs,
    out: &OutputArgs,
    show_progress: bool,
) -> Result<()> {
    let files = collect_inputs(inputs, &["md", "txt"])?;
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(Some(llm), Some(catalog_args), out, progress).await?;
    let catalog = open_catalog(catalog_args, &config).await?;
    let pipeline = Pipeline::from_config(config, Arc::new(catalog)).context("Failed to set up the LLM provider")?;

    let outcomes = process_batch(&pipeline, files).await;

    let mut failed = 0;
    let mut summaries = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(summary) => {
                if !cli.quiet && !cli.json {
                    print_summary(&summary);
                }
                summaries.push(summary);
            }
            Err(e) => {
                failed += 1;
                if !show_progress {
                    eprintln!("{} {}  {}", red("✗"), outcome.input.display(), red(&e.to_string()));
                }
            }
        }
    }
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summaries).context("Failed to serialise summaries")?
        );
    } else if !cli.quiet {
        let (input_tokens, output_tokens) = summaries.iter().fold((0, 0), |(i, o), s| {
            (i + s.tagging.input_tokens, o + s.tagging.output_tokens)
        });
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&input_tokens.to_string()),
            dim(&output_tokens.to_string())
        );
    }
    finish(failed, summaries.len() + failed)
}

async fn run_lookup(cli: &Cli, name: &str, category: EntityCategory, catalog_args: &CatalogArgs) -> Result<()> {
    let config = build_config(None, Some(catalog_args), &OutputArgs { output_dir: None }, None).await?;
    let catalog = open_catalog(catalog_args, &config).await?;
    let hits = catalog.lookup(name, category);

    if cli.json {
        let rows: Vec<_> = hits
            .iter()
            .map(|c| {
                serde_json::json!({
                    "record": c.record,
                    "score": c.score,
                    "kind": c.kind,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows).context("Failed to serialise candidates")?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No {} named '{}' in the catalog", category.name(), name);
        return Ok(());
    }
    for c in &hits {
        let kind = match c.kind {
            MatchKind::Exact => green("exact"),
            MatchKind::Fuzzy => yellow("fuzzy"),
        };
        println!("{:>10}  {:<30}  {:.3}  {}", c.record.id, c.record.name, c.score, kind);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    llm: Option<&LlmArgs>,
    catalog: Option<&CatalogArgs>,
    out: &OutputArgs,
    progress: Option<ProgressCallback>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder();

    if let Some(llm) = llm {
        builder = builder
            .concurrency(llm.concurrency)
            .max_tokens(llm.max_tokens)
            .temperature(llm.temperature)
            .max_retries(llm.max_retries)
            .api_timeout_secs(llm.api_timeout)
            .max_chunk_chars(llm.max_chunk_chars)
            .force(llm.force)
            .write_intermediate(!llm.no_intermediate);
        if !llm.categories.is_empty() {
            builder = builder.categories(llm.categories.iter().copied());
        }
        if let Some(ref model) = llm.model {
            builder = builder.model(model.clone());
        }
        if let Some(ref provider) = llm.provider {
            builder = builder.provider_name(provider.clone());
        }
        if let Some(ref path) = llm.system_prompt {
            let prompt = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
            builder = builder.system_prompt(prompt);
        }
    }
    if let Some(catalog) = catalog {
        builder = builder
            .fuzzy_threshold(catalog.threshold)
            .max_candidates(catalog.max_candidates);
    }
    if let Some(ref dir) = out.output_dir {
        builder = builder.output_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn open_catalog(args: &CatalogArgs, config: &PipelineConfig) -> Result<Catalog> {
    let manifest = match (&args.catalog, &args.data_dir) {
        (Some(path), _) => CatalogManifest::from_path(path)
            .with_context(|| format!("Failed to read catalog manifest {:?}", path))?,
        (None, Some(dir)) => CatalogManifest::nve_defaults(dir),
        (None, None) => anyhow::bail!("No catalog given: pass --catalog <manifest.json> or --data-dir <dir>"),
    };
    load_catalog(manifest, config.match_options())
        .await
        .context("Failed to load the reference catalog")
}

/// Expand directories (non-recursive) to files with one of `extensions`.
fn collect_inputs(inputs: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_extension(p, extensions))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        anyhow::bail!("No input documents found (looked for .{})", extensions.join(", ."));
    }
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn print_summary(summary: &DocumentSummary) {
    let c = &summary.report.counts;
    let mark = if summary.report.is_clean() {
        green("✔")
    } else {
        yellow("⚠")
    };
    eprintln!(
        "{} {}  {} markers: {} exact, {} fuzzy, {} ambiguous, {} unresolved{}  →  {}",
        mark,
        summary.input.display(),
        summary.report.total_markers,
        c.matched_exact,
        c.matched_fuzzy,
        c.ambiguous,
        c.unresolved,
        if summary.reused_tagging {
            dim("  (reused tagging)")
        } else {
            String::new()
        },
        bold(&summary.smart_document.display().to_string()),
    );
    let ctx = &summary.report.context;
    if !ctx.is_empty() {
        let parts: Vec<String> = [("kommune", &ctx.kommune), ("fylke", &ctx.fylke), ("eier", &ctx.eier)]
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| format!("{k}={v}")))
            .collect();
        eprintln!("    {}", dim(&parts.join("  ")));
    }
    for w in &summary.report.warnings {
        eprintln!("    {} {}", yellow("!"), w);
    }
}

fn finish(failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        anyhow::bail!("{failed}/{total} document(s) failed");
    }
    Ok(())
}
