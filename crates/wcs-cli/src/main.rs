//! CLI entry point for the working-copy status cache.
//!
//! # Usage
//!
//! ```bash
//! wcs [OPTIONS] <COMMAND>
//!
//! # Status of a few paths (crawls whatever is needed first)
//! wcs status src/main.rs docs --recursive
//!
//! # Crawl a working copy and summarize it
//! wcs scan /path/to/repo --detailed
//!
//! # Keep the cache live and print status changes as they happen
//! wcs watch /path/to/repo --cache-file ~/.cache/wcs.bin
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

mod git_provider;
mod notifier;

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{WrapErr, eyre};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wcs_cache::{
    CacheError, Crawler, ShellNotifier, StatsSnapshot, StatusCache, StatusEntry, StatusProvider, drain,
};
use wcs_core::{Config, StatusKind};
use wcs_watcher::{AdminDirFilter, EventBatchStats, FileEventBatch, FileWatcher};

use crate::git_provider::GitCliProvider;
use crate::notifier::{ChannelNotifier, LogNotifier};

/// Upper bound on query/drain rounds for a one-shot status query.
const MAX_SETTLE_ROUNDS: usize = 8;

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Hierarchical working-copy status cache.
///
/// Answers "what is the version-control status of this path, including
/// everything below it?" from an incrementally maintained cache.
#[derive(Parser)]
#[command(name = "wcs", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file.
    #[arg(short, long, global = true, env = "WCS_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Cache file loaded on start and saved on exit (overrides the config file).
    #[arg(long, global = true, env = "WCS_CACHE_FILE")]
    cache_file: Option<Utf8PathBuf>,

    /// Number of crawler threads (overrides the config file).
    #[arg(long, global = true, env = "WCS_THREADS")]
    threads: Option<usize>,

    /// Fold nested working copies into their parents' status.
    #[arg(long, global = true)]
    recurse_submodules: bool,

    /// Count unversioned files as modified in directory status.
    #[arg(long, global = true)]
    unversioned_as_modified: bool,

    /// `git` executable to run.
    #[arg(long, global = true, env = "WCS_GIT", default_value = "git")]
    git: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the status of one or more paths.
    Status {
        /// Paths to query.
        #[arg(required = true)]
        paths: Vec<Utf8PathBuf>,

        /// Fold everything below a directory into its status.
        #[arg(short, long)]
        recursive: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Crawl a working copy and display a summary.
    Scan {
        /// Any path inside the working copy.
        #[arg(default_value = ".")]
        path: Utf8PathBuf,

        /// List every cached directory with its status.
        #[arg(short, long)]
        detailed: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Keep the cache live and print status changes as they happen.
    Watch {
        /// Any path inside the working copy.
        #[arg(default_value = ".")]
        path: Utf8PathBuf,

        /// Disable file watching (crawl only).
        #[arg(long)]
        no_watch: bool,
    },
}

/// Output format.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text.
    Text,
    /// JSON.
    Json,
}

/// One line of `status` output.
#[derive(Debug, Serialize)]
struct StatusRow {
    path: Utf8PathBuf,
    status: StatusKind,
    assume_valid: bool,
    skip_worktree: bool,
}

/// One cached directory in `scan --detailed` output.
#[derive(Debug, Serialize)]
struct DirectoryRow {
    path: Utf8PathBuf,
    status: StatusKind,
    files: usize,
}

/// `scan` output.
#[derive(Debug, Serialize)]
struct ScanReport {
    root: Utf8PathBuf,
    status: StatusKind,
    directories: usize,
    requests: usize,
    elapsed_ms: u128,
    stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tree: Vec<DirectoryRow>,
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects `RUST_LOG` if set. Otherwise uses `debug` with `--verbose` and
/// `info` by default, with the watcher backend quieted to `warn`.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},mio=warn,notify=warn"))
    });

    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(use_ansi).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional config file and CLI overrides.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).wrap_err_with(|| format!("Failed to load config {path}"))?,
        None => Config::default(),
    };

    if let Some(cache_file) = &cli.cache_file {
        config.cache.cache_file = Some(cache_file.clone());
    }
    if let Some(threads) = cli.threads {
        config.cache.crawler_threads = threads;
    }
    config.cache.recurse_submodules |= cli.recurse_submodules;
    config.cache.unversioned_as_modified |= cli.unversioned_as_modified;
    config.cache.validate()?;

    Ok(config)
}

/// Makes `path` absolute and canonical so it matches cache keys.
fn resolve_path(path: &Utf8Path) -> color_eyre::Result<Utf8PathBuf> {
    if !path.exists() {
        return Err(eyre!("Path does not exist: {path}"));
    }
    path.canonicalize_utf8()
        .wrap_err_with(|| format!("Failed to resolve {path}"))
}

/// Creates the cache and warms it from the cache file if one is configured.
fn open_cache(
    config: &Config,
    git: &str,
    notifier: Arc<dyn ShellNotifier>,
) -> Arc<StatusCache> {
    let provider = GitCliProvider::new(config.cache.admin_dir_name.as_str()).with_program(git);
    let cache = StatusCache::new(config.cache.clone(), Arc::new(provider), notifier);

    if let Some(cache_file) = &config.cache.cache_file {
        if let WarmStart::Loaded(directories) = warm_start(&cache, cache_file) {
            info!(path = %cache_file, directories, "Warm start");
        }
    }

    Arc::new(cache)
}

/// How loading the cache file went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WarmStart {
    Loaded(usize),
    Missing,
    Corrupt,
    Unreadable,
}

/// Loads `cache_file` into `cache`; anything but success leaves the cache
/// cold.
fn warm_start(cache: &StatusCache, cache_file: &Utf8Path) -> WarmStart {
    match cache.load_from_file(cache_file) {
        Ok(directories) => WarmStart::Loaded(directories),
        Err(err) if err.is_missing_file() => {
            debug!(path = %cache_file, "No cache file yet");
            WarmStart::Missing
        }
        Err(CacheError::Persist(err)) if err.is_corruption() => {
            warn!(path = %cache_file, error = %err, "Discarding corrupt cache file");
            WarmStart::Corrupt
        }
        Err(err) => {
            warn!(path = %cache_file, error = %err, "Ignoring unreadable cache file");
            WarmStart::Unreadable
        }
    }
}

/// Writes the cache file if one is configured.
fn save_cache(cache: &StatusCache, config: &Config) -> color_eyre::Result<()> {
    if let Some(cache_file) = &config.cache.cache_file {
        cache.save_to_file(cache_file)?;
        info!(path = %cache_file, directories = cache.len(), "Saved status cache");
    }
    Ok(())
}

/// Finds the working copy root for `path`.
fn working_copy_root(cache: &StatusCache, path: &Utf8Path) -> color_eyre::Result<Utf8PathBuf> {
    cache
        .provider()
        .working_copy_root(path)
        .ok_or_else(|| eyre!("Not inside a working copy: {path}"))
}

/// Queues a full pass over `root`: a cheap refresh if it is already cached,
/// a crawl otherwise.
fn schedule_root(cache: &StatusCache, root: &Utf8Path) {
    if cache.lookup_only(root).is_some() {
        cache.enqueue_refresh(root, true);
    } else {
        cache.enqueue_crawl(root);
    }
}

/// Queries `path` and services the queue until the answer no longer
/// depends on queued work.
fn settle(cache: &StatusCache, path: &Utf8Path, recursive: bool) -> StatusEntry {
    let mut entry = cache.status(path, recursive);
    for _ in 0..MAX_SETTLE_ROUNDS {
        if drain(cache) == 0 {
            break;
        }
        entry = cache.status(path, recursive);
    }
    entry
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Prints the status of each path.
fn run_status(
    config: &Config,
    git: &str,
    paths: &[Utf8PathBuf],
    recursive: bool,
    format: OutputFormat,
) -> color_eyre::Result<()> {
    let cache = open_cache(config, git, Arc::new(LogNotifier));

    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        let path = resolve_path(path)?;
        let entry = settle(&cache, &path, recursive);
        rows.push(StatusRow {
            path,
            status: entry.effective_status(),
            assume_valid: entry.assume_valid(),
            skip_worktree: entry.skip_worktree(),
        });
    }

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    match format {
        OutputFormat::Json => writeln!(handle, "{}", serde_json::to_string_pretty(&rows)?)?,
        OutputFormat::Text => {
            for row in &rows {
                writeln!(handle, "{:<12} {}", row.status.label(), row.path)?;
            }
        }
    }

    save_cache(&cache, config)
}

/// Crawls the working copy containing `path` and prints a summary.
fn run_scan(
    config: &Config,
    git: &str,
    path: &Utf8Path,
    detailed: bool,
    format: OutputFormat,
) -> color_eyre::Result<()> {
    let path = resolve_path(path)?;
    let cache = open_cache(config, git, Arc::new(LogNotifier));
    let root = working_copy_root(&cache, &path)?;
    info!(root = %root, "Starting scan");

    let started = Instant::now();
    schedule_root(&cache, &root);
    let requests = drain(&cache);
    let status = settle(&cache, &root, true).effective_status();

    let tree = if detailed {
        cache
            .directories()
            .into_iter()
            .filter(|dir| dir.starts_with(&root))
            .filter_map(|dir| {
                let node = cache.lookup_only(&dir)?;
                Some(DirectoryRow {
                    status: node.current_status(),
                    files: node.file_count(),
                    path: dir,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let report = ScanReport {
        root,
        status,
        directories: cache.len(),
        requests,
        elapsed_ms: started.elapsed().as_millis(),
        stats: cache.stats(),
        tree,
    };

    match format {
        OutputFormat::Json => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        OutputFormat::Text => print_scan_report(&report)?,
    }

    save_cache(&cache, config)
}

/// Runs the crawler and the watcher until interrupted, printing every
/// status change the cache reports.
async fn run_watch(config: Config, git: &str, path: &Utf8Path, no_watch: bool) -> color_eyre::Result<()> {
    let path = resolve_path(path)?;
    let (notifier, mut changes) = ChannelNotifier::new();
    let cache = open_cache(&config, git, Arc::new(notifier));
    let root = working_copy_root(&cache, &path)?;
    let admin = config.cache.admin_dir_name.clone();

    let crawler = Crawler::spawn(Arc::clone(&cache), config.cache.crawler_threads)?;
    schedule_root(&cache, &root);

    let mut watcher = if config.watch.enabled && !no_watch {
        Some(FileWatcher::new(&root, &config.watch, AdminDirFilter::new(admin.as_str())).await?)
    } else {
        None
    };
    info!(root = %root, watch = watcher.is_some(), "Watching working copy");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(batch) = next_batch(&mut watcher) => apply_batch(&cache, &batch, &admin),
            Some(changed) = changes.recv() => print_change(&cache, &changed)?,
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal");
                break;
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.shutdown().await?;
    }
    tokio::task::spawn_blocking(move || crawler.shutdown()).await?;

    info!(stats = %cache.stats(), "Final statistics");
    save_cache(&cache, &config)
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Waits for the next watch batch, or forever when watching is off.
async fn next_batch(watcher: &mut Option<FileWatcher>) -> Option<FileEventBatch> {
    match watcher {
        Some(watcher) => watcher.recv_batch().await,
        None => std::future::pending().await,
    }
}

/// Turns a watch batch into refresh requests.
fn apply_batch(cache: &StatusCache, batch: &FileEventBatch, admin: &str) {
    let stats = EventBatchStats::from_batch(batch, admin);
    debug!(
        events = stats.total_events,
        admin = stats.admin_events,
        targets = stats.refresh_targets,
        "Watch batch"
    );
    for target in batch.refresh_targets(admin) {
        cache.enqueue_refresh(&target.path, target.recursive);
    }
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Prints one reported status change.
fn print_change(cache: &StatusCache, path: &Utf8Path) -> std::io::Result<()> {
    let status = cache.status(path, true).effective_status();
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{:<12} {path}", status.label())
}

/// Prints a scan summary.
fn print_scan_report(report: &ScanReport) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    writeln!(handle)?;
    writeln!(handle, "Working Copy Status")?;
    writeln!(handle, "===================")?;
    writeln!(handle)?;
    writeln!(handle, "Root:               {}", report.root)?;
    writeln!(handle, "Status:             {}", report.status)?;
    writeln!(handle, "Directories cached: {}", report.directories)?;
    writeln!(handle, "Requests serviced:  {}", report.requests)?;
    writeln!(handle, "Elapsed:            {} ms", report.elapsed_ms)?;
    writeln!(handle, "{}", report.stats)?;

    if !report.tree.is_empty() {
        writeln!(handle)?;
        writeln!(handle, "Directories ({}):", report.tree.len())?;
        for row in &report.tree {
            let rel = row.path.strip_prefix(&report.root).map_or(row.path.as_str(), Utf8Path::as_str);
            let rel = if rel.is_empty() { "." } else { rel };
            writeln!(handle, "  {:<12} {rel} ({} files)", row.status.label(), row.files)?;
        }
    }

    Ok(())
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Install color-eyre before anything can fail.
    color_eyre::install()?;

    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.no_color);

    let config = build_config(&cli)?;

    match &cli.command {
        Commands::Status {
            paths,
            recursive,
            format,
        } => run_status(&config, &cli.git, paths, *recursive, *format),
        Commands::Scan {
            path,
            detailed,
            format,
        } => run_scan(&config, &cli.git, path, *detailed, *format),
        Commands::Watch { path, no_watch } => run_watch(config, &cli.git, path, *no_watch).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("wcs").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_parses_status() {
        let cli = parse(&["status", "a.rs", "src", "--recursive", "--format", "json"]);
        match cli.command {
            Commands::Status {
                paths,
                recursive,
                format,
            } => {
                assert_eq!(paths, vec![Utf8PathBuf::from("a.rs"), Utf8PathBuf::from("src")]);
                assert!(recursive);
                assert!(matches!(format, OutputFormat::Json));
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn test_cli_status_requires_paths() {
        assert!(Cli::try_parse_from(["wcs", "status"]).is_err());
    }

    #[test]
    fn test_build_config_applies_overrides() {
        let cli = parse(&[
            "scan",
            "--threads",
            "6",
            "--cache-file",
            "/tmp/wcs.bin",
            "--recurse-submodules",
        ]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.cache.crawler_threads, 6);
        assert_eq!(config.cache.cache_file.as_deref(), Some(Utf8Path::new("/tmp/wcs.bin")));
        assert!(config.cache.recurse_submodules);
        assert!(!config.cache.unversioned_as_modified);
    }

    #[test]
    fn test_build_config_rejects_zero_threads() {
        let cli = parse(&["scan", "--threads", "0"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_build_config_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = Utf8Path::from_path(tmp.path()).unwrap().join("wcs.json");
        std::fs::write(&file, r#"{ "cache": { "unversioned_as_modified": true }, "watch": { "debounce_ms": 20 } }"#)
            .unwrap();

        let cli = parse(&["scan", "--config", file.as_str()]);
        let config = build_config(&cli).unwrap();
        assert!(config.cache.unversioned_as_modified);
        assert_eq!(config.watch.debounce_ms, 20);
    }

    #[test]
    fn test_resolve_path_missing() {
        assert!(resolve_path(Utf8Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_status_row_json() {
        let row = StatusRow {
            path: Utf8PathBuf::from("/repo/a.rs"),
            status: StatusKind::Modified,
            assume_valid: false,
            skip_worktree: true,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["path"], "/repo/a.rs");
        assert_eq!(json["skip_worktree"], true);
    }

    #[test]
    fn test_warm_start_outcomes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let cache = StatusCache::new(
            wcs_core::CacheConfig::default(),
            Arc::new(GitCliProvider::new(".git")),
            Arc::new(LogNotifier),
        );

        let file = dir.join("wcs.bin");
        assert_eq!(warm_start(&cache, &file), WarmStart::Missing);

        cache.save_to_file(&file).unwrap();
        assert_eq!(warm_start(&cache, &file), WarmStart::Loaded(0));

        std::fs::write(&file, [0xFF, 0, 0, 0]).unwrap();
        assert_eq!(warm_start(&cache, &file), WarmStart::Corrupt);

        std::fs::write(&file, [1, 0]).unwrap();
        assert_eq!(warm_start(&cache, &file), WarmStart::Unreadable);
    }
}
