use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use logsearch::{
    EncodingMode, ManagerEvent, Mode, ResultModel, Scope, SearchConfig, SearchJob, SearchManager,
    SearchParameters, Status,
};
use serde_json::json;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliSearchConfig {
    /// Pattern to search for
    pattern: String,

    /// Files or directories to search
    #[arg(default_value = ".")]
    paths: Vec<PathBuf>,

    /// How the pattern is matched (contains|equals|starts-with|ends-with|regex)
    #[arg(short = 'm', long, default_value = "contains")]
    mode: Mode,

    /// Which paths are searched (folder|current-file|all-opened)
    #[arg(short = 's', long, default_value = "folder")]
    scope: Scope,

    /// Match case exactly
    #[arg(short = 'c', long)]
    case_sensitive: bool,

    /// Only search files whose name matches one of these globs
    #[arg(short = 'g', long = "glob")]
    globs: Vec<String>,

    /// Number of threads to use
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Extra configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// How to handle invalid UTF-8 sequences (lossy|failfast)
    #[arg(long)]
    encoding: Option<String>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the result model as JSON
    #[arg(long)]
    json: bool,

    /// Show only statistics, not matches
    #[arg(long)]
    stats: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for a pattern in files
    Search(Box<CliSearchConfig>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(config) => run_search(*config),
    }
}

fn run_search(args: CliSearchConfig) -> Result<()> {
    let encoding = args.encoding.as_deref().map(parse_encoding).transpose()?;
    let config = SearchConfig::load_from(args.config.as_deref())
        .context("Failed to load configuration")?
        .merge_with_cli(args.threads, args.log_level.clone(), encoding);

    init_logging(&config.log_level);
    debug!("Effective configuration: {:?}", config);

    let files = resolve_files(args.scope, &args.paths, &args.globs)?;
    info!("Searching {} files", files.len());

    let params = SearchParameters::new(args.pattern, args.mode)
        .with_scope(args.scope)
        .case_sensitive(args.case_sensitive)
        .with_files(files);

    let manager = SearchManager::new(config)?;
    let events = manager.subscribe();
    let started = Instant::now();
    let handle = manager.submit(params);

    let progress = if args.no_progress || args.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}%")?
                .progress_chars("=>-"),
        );
        bar
    };

    let status = loop {
        match events.recv() {
            Ok(ManagerEvent::Progress { percent, job }) if job.id() == handle.id() => {
                progress.set_position(u64::from(percent));
            }
            Ok(ManagerEvent::Complete { status, job }) if job.id() == handle.id() => break status,
            Ok(_) => {}
            Err(_) => bail!("Search manager stopped before the search completed"),
        }
    };
    progress.finish_and_clear();
    let elapsed = started.elapsed();

    let job = handle
        .get()
        .ok_or_else(|| anyhow!("Search job was released before its results were read"))?;

    if status == Status::Error {
        let reason = job.error().unwrap_or_else(|| "unknown error".to_string());
        bail!("Search failed: {}", reason);
    }

    let model = job
        .to_result_model()
        .ok_or_else(|| anyhow!("Search ended in {} state without results", status))?;

    if args.json {
        print_json(&job, status, &model, elapsed)?;
    } else {
        print_search_results(&job, status, &model, elapsed, args.stats);
    }
    Ok(())
}

fn init_logging(level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn parse_encoding(value: &str) -> Result<EncodingMode> {
    match value.to_lowercase().as_str() {
        "lossy" => Ok(EncodingMode::Lossy),
        "failfast" | "fail-fast" => Ok(EncodingMode::FailFast),
        other => bail!("Unknown encoding mode '{}' (expected lossy or failfast)", other),
    }
}

/// Turns the command line paths into the file list handed to the engine
fn resolve_files(scope: Scope, paths: &[PathBuf], globs: &[String]) -> Result<Vec<PathBuf>> {
    let patterns = globs
        .iter()
        .map(|g| glob::Pattern::new(g).with_context(|| format!("Invalid glob '{}'", g)))
        .collect::<Result<Vec<_>>>()?;

    let candidates = match scope {
        Scope::Folder => {
            let mut files = Vec::new();
            for path in paths {
                if path.is_dir() {
                    files.extend(list_folder(path)?);
                } else {
                    files.push(path.clone());
                }
            }
            files
        }
        Scope::CurrentFile => paths.iter().take(1).cloned().collect(),
        Scope::AllOpened => paths.to_vec(),
    };

    Ok(candidates
        .into_iter()
        .filter(|path| matches_globs(path, &patterns))
        .collect())
}

/// Regular files directly inside `dir`, sorted by name
fn list_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(dir)
        .max_depth(Some(1))
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry.with_context(|| format!("Cannot list {}", dir.display()))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn matches_globs(path: &Path, patterns: &[glob::Pattern]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    patterns.iter().any(|p| p.matches(&name))
}

fn rounded(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis() as u64)
}

fn print_json(
    job: &SearchJob,
    status: Status,
    model: &ResultModel,
    elapsed: Duration,
) -> Result<()> {
    let output = json!({
        "pattern": job.params().pattern,
        "mode": job.params().mode,
        "status": status,
        "total_matches": model.match_count(),
        "files_with_matches": model.files_with_matches(),
        "elapsed_ms": elapsed.as_millis() as u64,
        "files": model.files,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_search_results(
    job: &SearchJob,
    status: Status,
    model: &ResultModel,
    elapsed: Duration,
    stats_only: bool,
) {
    if !stats_only {
        for file in model.files.iter().filter(|f| !f.matches.is_empty()) {
            println!("\n{}", file.file_path.display().to_string().blue());
            for m in &file.matches {
                println!("{}: {}", m.line_number.to_string().green(), m.line_content);
            }
        }
    }

    if status == Status::Canceled {
        println!("\n{}", "Search canceled".yellow());
    }

    println!(
        "\nFound {} matches in {} files",
        model.match_count(),
        model.files_with_matches()
    );

    if stats_only {
        let stats = job.metrics().get_stats();
        println!("Files searched: {}", model.file_count());
        println!("Unreadable files: {}", stats.files_unreadable);
        println!("Lines read: {}", stats.lines_read);
        println!("Bytes read: {}", stats.bytes_read);
        println!("Elapsed: {}", humantime::format_duration(rounded(elapsed)));
    }
}
