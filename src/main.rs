use anyhow::{Context, Result};
use ariadne::config::{
    CHECKPOINT_INTERVAL, COUNT_TICK_INTERVAL, DEFAULT_SHARD_THRESHOLD_MB, MEMORY_TRIM_INTERVAL,
    PREVIEW_CHARS, PROGRESS_INTERVAL,
};
use ariadne::pipeline::{self, IngestOptions};
use ariadne::{cache, parser, shard};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ariadne")]
#[command(about = "Ingest Wikipedia dumps into resumable, sharded SQLite stores")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv); RUST_LOG takes precedence when set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a dump, resuming from the last checkpoint in the output directory
    Ingest(IngestArgs),
    /// Count pages in a dump and cache the total for progress reporting
    Count(CountArgs),
    /// List shards with their sizes, article counts, and checkpoint
    Status(StatusArgs),
    /// Show the checkpoint and the page a resumed run would start with
    Validate(ValidateArgs),
    /// Compact the active shard in place
    Vacuum(StatusArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory holding the shard files
    #[arg(short, long)]
    output: PathBuf,

    /// Seal the active shard once it grows past this many megabytes
    #[arg(long, default_value_t = DEFAULT_SHARD_THRESHOLD_MB)]
    shard_threshold_mb: u64,

    /// Pages consumed between checkpoint commits
    #[arg(long, default_value_t = CHECKPOINT_INTERVAL)]
    checkpoint_interval: u32,

    /// Pages consumed between progress.csv rows
    #[arg(long, default_value_t = PROGRESS_INTERVAL)]
    progress_interval: u32,

    /// Pages consumed between allocator memory hints
    #[arg(long, default_value_t = MEMORY_TRIM_INTERVAL)]
    memory_trim_interval: u32,

    /// Compact the active shard every N committed pages
    #[arg(long)]
    vacuum_interval: Option<u64>,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Total pages in the dump, for percent-complete reporting
    #[arg(long)]
    total_pages: Option<u64>,

    /// Count pages before ingesting when no cached total exists
    #[arg(long)]
    count_pages: bool,

    /// Remove the output directory before starting
    #[arg(long)]
    clean: bool,

    /// Hide the progress spinner
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct CountArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory to store the cached total in
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct StatusArgs {
    /// Directory holding the shard files
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory holding the shard files
    #[arg(short, long)]
    output: PathBuf,
}

fn input_str(input: &Path) -> Result<&str> {
    input
        .to_str()
        .with_context(|| format!("Input path is not valid UTF-8: {:?}", input))
}

fn count_with_spinner(input: &Path) -> Result<u64> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] Counting pages: {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    let total = parser::count_pages(input, COUNT_TICK_INTERVAL, |count| {
        pb.set_message(count.to_string());
    })
    .with_context(|| format!("Failed to count pages in: {:?}", input))?;

    pb.finish_and_clear();
    Ok(total)
}

/// Resolves the page total from the flag, the cache, or a counting pass.
fn resolve_total(args: &IngestArgs) -> Result<Option<u64>> {
    if args.total_pages.is_some() {
        return Ok(args.total_pages);
    }

    let input = input_str(&args.input)?;
    if let Some(total) = cache::try_load_page_count(&args.output, input)? {
        info!(total_pages = total, "Loaded page count from cache");
        return Ok(Some(total));
    }

    if !args.count_pages {
        return Ok(None);
    }

    let total = count_with_spinner(&args.input)?;
    if let Err(e) = cache::save_page_count(&args.output, input, total) {
        warn!(error = %e, "Failed to save page count cache");
    }
    Ok(Some(total))
}

fn run_ingest(args: IngestArgs) -> Result<()> {
    if args.clean && args.output.exists() {
        info!("Cleaning output directory: {:?}", args.output);
        fs::remove_dir_all(&args.output)
            .with_context(|| format!("Failed to clean output directory: {:?}", args.output))?;
    }

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {:?}", args.output))?;

    let total_pages = resolve_total(&args)?;

    let mut opts = IngestOptions::new(&args.input, &args.output);
    opts.shard_threshold_bytes = args.shard_threshold_mb.saturating_mul(1024 * 1024);
    opts.checkpoint_interval = args.checkpoint_interval;
    opts.progress_interval = args.progress_interval;
    opts.memory_trim_interval = args.memory_trim_interval;
    opts.vacuum_interval = args.vacuum_interval;
    opts.limit = args.limit;
    opts.total_pages = total_pages;
    opts.show_progress = !args.quiet;

    let start = Instant::now();
    let stats = pipeline::run_ingest(&opts)
        .with_context(|| format!("Ingestion of {:?} failed", args.input))?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", duration.as_secs_f64());
    println!();
    println!("Pages committed:    {}", stats.pages_committed);
    println!("Skipped (empty):    {}", stats.skipped_empty);
    println!("Skipped (encoding): {}", stats.skipped_encoding);
    println!("Skipped (dupes):    {}", stats.skipped_duplicate);
    println!("Resumed over:       {}", stats.resumed_over);
    println!("Redirects:          {}", stats.redirects);
    println!("Sections written:   {}", stats.sections_written);
    println!("Category links:     {}", stats.category_links);
    println!("Tables extracted:   {}", stats.tables_extracted);
    println!("Infoboxes found:    {}", stats.infoboxes_extracted);
    println!("Shard rollovers:    {}", stats.rollovers);
    match stats.last_page_id {
        Some(id) => println!("Last page id:       {}", id),
        None => println!("Last page id:       -"),
    }

    Ok(())
}

fn run_count(args: CountArgs) -> Result<()> {
    let start = Instant::now();
    let total = count_with_spinner(&args.input)?;
    cache::save_page_count(&args.output, input_str(&args.input)?, total)?;

    println!("Pages:              {}", total);
    println!("Count time:         {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let shards = shard::list_shards(&args.output)
        .with_context(|| format!("Failed to read shards in: {:?}", args.output))?;
    if shards.is_empty() {
        println!("No shards in {:?}", args.output);
        return Ok(());
    }

    println!("{:<8} {:>14} {:>10} {:>8}  file", "ordinal", "bytes", "articles", "sealed");
    for info in &shards {
        println!(
            "{:<8} {:>14} {:>10} {:>8}  {}",
            info.ordinal,
            info.file_bytes,
            info.article_count,
            if info.sealed { "yes" } else { "no" },
            info.path.display()
        );
    }

    let total_articles: u64 = shards.iter().map(|s| s.article_count).sum();
    let total_bytes: u64 = shards.iter().map(|s| s.file_bytes).sum();
    println!();
    println!("Shards:             {}", shards.len());
    println!("Articles:           {}", total_articles);
    println!("Bytes on disk:      {}", total_bytes);
    match shards.last().and_then(|s| s.checkpoint) {
        Some(id) => println!("Checkpoint:         {}", id),
        None => println!("Checkpoint:         none"),
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let pending = pipeline::next_pending_page(&args.input, &args.output)
        .context("Failed to locate resume point")?;

    match pending.checkpoint {
        Some(id) => println!("Checkpoint:         {}", id),
        None => println!("Checkpoint:         none (fresh start)"),
    }

    match pending.next {
        Some(page) => {
            println!("Next page id:       {}", page.id);
            println!("Next page title:    {}", page.title);
            let preview: String = page.text.chars().take(PREVIEW_CHARS).collect();
            println!();
            println!("{}", preview);
        }
        None => println!("No pages remain after the checkpoint"),
    }
    Ok(())
}

fn run_vacuum(args: StatusArgs) -> Result<()> {
    match shard::compact_active(&args.output)? {
        Some((ordinal, before, after)) => {
            println!("Shard {:03}: {} -> {} bytes", ordinal, before, after);
        }
        None => println!("No active shard to compact in {:?}", args.output),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Ingest(args) => run_ingest(args),
        Commands::Count(args) => run_count(args),
        Commands::Status(args) => run_status(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Vacuum(args) => run_vacuum(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
