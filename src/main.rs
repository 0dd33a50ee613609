// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Arbor: classify documents and file them into a category tree

use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use arbor::classifier::HttpClassifier;
use arbor::config::AppConfig;
use arbor::history::{History, UndoOutcome};
use arbor::loader::DirectoryLoader;
use arbor::operations::FileOperationsManager;
use arbor::paths::PathResolver;
use arbor::pipeline::{spawn_worker, FileReport, FileStatus, SortQueue, Sorter};
use arbor::registry::ProcessedRegistry;
use arbor::tree::{CategoryId, CategorySnapshot, CategoryTree};
use arbor::watcher::{should_process, wait_for_stable, FileWatcher, WatchEvent};
use arbor::{ArborError, Result};

/// Arbor CLI - classify documents and file them by category
#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Sort documents into a category tree using a classification service", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Base directory of the category tree (overrides config)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify files and move them into their categories
    Sort {
        /// Files or directories to sort
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Show where files would go without moving them
        #[arg(long)]
        dry_run: bool,

        /// Descend into subdirectories of directory arguments
        #[arg(short, long)]
        recursive: bool,
    },

    /// Watch inbox directories and sort new files as they arrive
    Watch {
        /// Directories to watch (overrides config)
        #[arg(short, long)]
        dir: Vec<PathBuf>,

        /// Show where files would go without moving them
        #[arg(long)]
        dry_run: bool,

        /// Skip classifier health check on startup
        #[arg(long)]
        skip_health_check: bool,

        /// Sort files already in the inbox on startup
        #[arg(long)]
        process_existing: bool,
    },

    /// Print the category tree
    Tree {
        /// Count the files on disk in every category
        #[arg(long)]
        files: bool,
    },

    /// List the files in a category, e.g. "Sem - 3/CN"
    Ls {
        category: String,
    },

    /// Move a file into another category
    Mv {
        file: PathBuf,

        /// Destination category
        #[arg(long)]
        to: String,

        /// Category the file currently belongs to
        #[arg(long)]
        from: Option<String>,
    },

    /// Rename a file inside its category
    Rename {
        file: PathBuf,

        new_name: String,

        /// Category holding the file
        #[arg(long)]
        category: String,
    },

    /// Delete a file from a category
    Rm {
        file: PathBuf,

        /// Category holding the file
        #[arg(long)]
        category: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// History and undo operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show classifier and storage status
    Status,

    /// Initialize a new Arbor workspace
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent history entries
    List {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Undo recent moves and renames
    Undo {
        /// Number of operations to undo
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Dry run (show what would be undone)
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear all history
    Clear {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    debug!("Arbor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(base) = &cli.base_dir {
        config.base_dir = base.to_string_lossy().into_owned();
    }

    match cli.command {
        Some(Commands::Sort { paths, dry_run, recursive }) => {
            run_sort(config, paths, dry_run, recursive, &cli.format).await
        }
        Some(Commands::Watch { dir, dry_run, skip_health_check, process_existing }) => {
            run_watch(config, dir, dry_run, skip_health_check, process_existing).await
        }
        Some(Commands::Tree { files }) => run_tree(config, files, &cli.format).await,
        Some(Commands::Ls { category }) => run_ls(config, &category, &cli.format).await,
        Some(Commands::Mv { file, to, from }) => run_mv(config, file, &to, from.as_deref()).await,
        Some(Commands::Rename { file, new_name, category }) => {
            run_rename(config, file, &new_name, &category).await
        }
        Some(Commands::Rm { file, category, yes }) => run_rm(config, file, &category, yes).await,
        Some(Commands::History { action }) => run_history_command(config, action),
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Status) => run_status(config).await,
        Some(Commands::Init { dir, force }) => run_init(dir, force),
        None => {
            // Default: run watch mode
            run_watch(config, vec![], false, false, false).await
        }
    }
}

/// Configured taxonomy plus every category remembered from earlier runs
fn open_tree(config: &AppConfig) -> CategoryTree {
    let mut tree = config.initial_tree();
    match CategorySnapshot::load(&config.snapshot_path()) {
        Ok(Some(snapshot)) => {
            tree.restore(&snapshot);
            debug!("Restored {} categories from snapshot", tree.len());
        }
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable category snapshot: {}", e),
    }
    tree
}

fn operations(config: &AppConfig) -> FileOperationsManager {
    FileOperationsManager::new(PathResolver::new(config.base_path()))
        .with_history(History::new(config.history_path()))
        .with_rename_on_conflict(config.rules.rename_on_conflict)
}

fn category(tree: &CategoryTree, name: &str) -> Result<CategoryId> {
    tree.lookup(name)
        .ok_or_else(|| ArborError::UnknownCategory(name.to_string()))
}

/// A bare file name refers to a file inside `category`'s directory
fn locate(resolver: &PathResolver, tree: &CategoryTree, category: CategoryId, file: PathBuf) -> PathBuf {
    let bare = file.parent().map_or(true, |p| p.as_os_str().is_empty());
    if bare {
        resolver.resolve(tree, category).join(file)
    } else {
        file
    }
}

/// Files named directly, plus the sortable files inside named directories
fn collect_files(paths: Vec<PathBuf>, recursive: bool, config: &AppConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                walk_dir(&path, recursive)
                    .into_iter()
                    .filter(|p| should_process(p, &config.rules)),
            );
        } else {
            files.push(path);
        }
    }
    files
}

fn walk_dir(path: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();

    match std::fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() {
                    if recursive {
                        files.extend(walk_dir(&p, recursive));
                    }
                } else if p.is_file() {
                    files.push(p);
                }
            }
        }
        Err(e) => warn!("Cannot read directory {:?}: {}", path, e),
    }

    files.sort();
    files
}

fn build_sorter(config: &AppConfig, dry_run: bool) -> Result<Sorter<HttpClassifier>> {
    let classifier = HttpClassifier::new(&config.classifier)?;
    let mut sorter = Sorter::new(open_tree(config), operations(config), classifier)
        .with_max_file_size(config.rules.max_file_size_bytes())
        .with_dry_run(dry_run);
    if !dry_run {
        sorter = sorter.with_snapshot(config.snapshot_path());
    }
    Ok(sorter)
}

/// Classify and file the given paths one after another
async fn run_sort(
    config: AppConfig,
    paths: Vec<PathBuf>,
    dry_run: bool,
    recursive: bool,
    format: &str,
) -> Result<()> {
    let files = collect_files(paths, recursive, &config);
    if files.is_empty() {
        warn!("Nothing to sort");
        return Ok(());
    }
    if dry_run {
        warn!("DRY RUN MODE - files will not be moved");
    }

    let (queue, worker) = spawn_worker(build_sorter(&config, dry_run)?);

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let report = queue.submit(file).await?;
        if format == "text" {
            print_report(&report);
        } else if format == "jsonl" {
            println!("{}", serde_json::to_string(&report.to_json())?);
        }
        reports.push(report);
    }
    drop(queue);
    worker.await.map_err(|_| ArborError::WorkerStopped)?;

    match format {
        "json" => {
            let output: Vec<_> = reports.iter().map(FileReport::to_json).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "text" => {
            let filed = reports
                .iter()
                .filter(|r| matches!(r.status, FileStatus::Filed { .. } | FileStatus::Planned { .. }))
                .count();
            let failed = reports.iter().filter(|r| r.error().is_some()).count();
            println!(
                "\n{} {} files, {} skipped, {} failed",
                if dry_run { "Planned" } else { "Filed" },
                filed,
                reports.len() - filed - failed,
                failed
            );
        }
        _ => {}
    }

    Ok(())
}

fn print_report(report: &FileReport) {
    match &report.status {
        FileStatus::Filed { destination, .. } => {
            println!("{} -> {}", report.path.display(), destination.display())
        }
        FileStatus::Planned { destination, .. } => {
            println!("{} => {} (dry run)", report.path.display(), destination.display())
        }
        FileStatus::Skipped(reason) => println!("{}: skipped ({:?})", report.path.display(), reason),
        FileStatus::ClassificationFailed(e) | FileStatus::PartialMove(e) | FileStatus::Failed(e) => {
            eprintln!("{}: {}", report.path.display(), e)
        }
    }
}

/// Run the watch mode (inbox loop)
async fn run_watch(
    config: AppConfig,
    dir_overrides: Vec<PathBuf>,
    dry_run: bool,
    skip_health_check: bool,
    process_existing: bool,
) -> Result<()> {
    let watch_paths = if dir_overrides.is_empty() {
        config.watch_dirs()
    } else {
        dir_overrides
    };

    info!("Watch directories: {:?}", watch_paths);
    info!("Filing into: {:?}", config.base_path());

    if dry_run {
        warn!("DRY RUN MODE - files will not be moved");
    }

    let sorter = build_sorter(&config, dry_run)?;

    if !skip_health_check {
        info!("Checking classifier availability...");
        let client = HttpClassifier::new(&config.classifier)?;
        client.health_check().await?;
        info!("Classifier is reachable at {}", client.url());
    } else {
        warn!("Skipping classifier health check");
    }

    let sorter = if dry_run {
        sorter
    } else {
        sorter.with_registry(ProcessedRegistry::load(config.registry_path()))
    };
    let (queue, worker) = spawn_worker(sorter);

    let mut watcher = FileWatcher::new()?;
    for path in &watch_paths {
        watcher.watch(path)?;
    }

    if process_existing {
        info!("Queueing existing files...");
        for dir in &watch_paths {
            for path in walk_dir(dir, false) {
                if should_process(&path, &config.rules) {
                    queue.enqueue(path)?;
                }
            }
        }
    }

    let settle = Duration::from_secs(config.watcher.settle_secs);
    let max_wait = Duration::from_secs(config.watcher.max_wait_secs);

    info!("Watching for files. Press Ctrl+C to stop.");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = watcher.next_event() => match event {
                Some(WatchEvent::Error(e)) => warn!("Watch error: {}", e),
                Some(event) => {
                    if let Some(path) = event.arrival() {
                        if should_process(path, &config.rules) {
                            queue_when_stable(queue.clone(), path.to_path_buf(), settle, max_wait);
                        } else {
                            debug!("Ignoring {:?}", path);
                        }
                    }
                }
                None => {
                    error!("File watcher stopped unexpectedly");
                    break;
                }
            },
        }
    }

    drop(queue);
    info!("Finishing queued files...");
    worker.await.map_err(|_| ArborError::WorkerStopped)?;

    info!("Arbor stopped.");
    Ok(())
}

/// Hand `path` to the worker once it has stopped growing
fn queue_when_stable(queue: SortQueue, path: PathBuf, settle: Duration, max_wait: Duration) {
    tokio::spawn(async move {
        if !wait_for_stable(&path, settle, max_wait).await {
            debug!("File disappeared during stability check: {:?}", path);
            return;
        }
        if let Err(e) = queue.enqueue(path.clone()) {
            error!("Failed to queue {:?}: {}", path, e);
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

async fn run_tree(config: AppConfig, files: bool, format: &str) -> Result<()> {
    let mut tree = open_tree(&config);
    tree.check_invariants()?;

    if format != "text" {
        println!("{}", serde_json::to_string_pretty(&tree.snapshot())?);
        return Ok(());
    }

    if files {
        let loader = DirectoryLoader::new(PathResolver::new(config.base_path()));
        for (_, id) in tree.walk() {
            loader.refresh(&mut tree, id).await?;
        }
    }

    println!("{}", config.base_path().display());
    for (depth, id) in tree.walk().into_iter().skip(1) {
        let node = tree.get(id);
        let indent = "  ".repeat(depth);
        if files {
            println!("{}{} ({})", indent, node.name(), node.files().len());
        } else {
            println!("{}{}", indent, node.name());
        }
    }

    Ok(())
}

async fn run_ls(config: AppConfig, name: &str, format: &str) -> Result<()> {
    let tree = open_tree(&config);
    let id = category(&tree, name)?;
    let loader = DirectoryLoader::new(PathResolver::new(config.base_path()));
    let files = loader.load(&tree, id).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&files)?),
        "jsonl" => {
            for file in &files {
                println!("{}", serde_json::to_string(file)?);
            }
        }
        _ => {
            println!("{} ({} files):", tree.display_path(id), files.len());
            for file in &files {
                if let Some(name) = file.file_name() {
                    println!("  {}", name.to_string_lossy());
                }
            }
        }
    }

    Ok(())
}

async fn run_mv(config: AppConfig, file: PathBuf, to: &str, from: Option<&str>) -> Result<()> {
    let mut tree = open_tree(&config);
    let manager = operations(&config);
    let loader = DirectoryLoader::new(manager.resolver().clone());

    let destination = category(&tree, to)?;
    let (source, file) = match from {
        Some(name) => {
            let source = category(&tree, name)?;
            loader.refresh(&mut tree, source).await?;
            (Some(source), locate(manager.resolver(), &tree, source, file))
        }
        None => (None, file),
    };
    loader.refresh(&mut tree, destination).await?;

    let record = manager.move_file(&mut tree, &file, source, destination).await?;
    if let Some(target) = record.destination {
        println!("Moved: {} -> {}", file.display(), target.display());
    }
    Ok(())
}

async fn run_rename(config: AppConfig, file: PathBuf, new_name: &str, name: &str) -> Result<()> {
    let mut tree = open_tree(&config);
    let manager = operations(&config);
    let loader = DirectoryLoader::new(manager.resolver().clone());

    let id = category(&tree, name)?;
    loader.refresh(&mut tree, id).await?;
    let file = locate(manager.resolver(), &tree, id, file);

    let record = manager.rename_file(&mut tree, &file, id, new_name).await?;
    if let Some(target) = record.destination {
        println!("Renamed: {} -> {}", file.display(), target.display());
    }
    Ok(())
}

async fn run_rm(config: AppConfig, file: PathBuf, name: &str, yes: bool) -> Result<()> {
    let mut tree = open_tree(&config);
    let manager = operations(&config);
    let loader = DirectoryLoader::new(manager.resolver().clone());

    let id = category(&tree, name)?;
    loader.refresh(&mut tree, id).await?;
    let file = locate(manager.resolver(), &tree, id, file);

    let mut confirm = |path: &Path| yes || prompt(&format!("Delete {}? [y/N] ", path.display()));

    match manager.delete_file(&mut tree, &file, id, &mut confirm).await {
        Ok(_) => {
            println!("Deleted: {}", file.display());
            Ok(())
        }
        Err(ArborError::DeleteNotConfirmed(_)) => {
            println!("Cancelled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn prompt(question: &str) -> bool {
    print!("{}", question);
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Run history commands
fn run_history_command(config: AppConfig, action: HistoryCommands) -> Result<()> {
    let history = History::new(config.history_path());

    match action {
        HistoryCommands::List { count } => {
            let entries = history.get_recent(count)?;
            println!("Recent history ({} entries):", entries.len());
            for entry in entries {
                let status = if entry.undone { "[UNDONE]" } else { "" };
                println!("  {} {:?} {} -> {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.action,
                    entry.original_path.display(),
                    entry.new_path.display(),
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let outcomes = history.undo(count, dry_run)?;

            if outcomes.is_empty() {
                println!("Nothing to undo");
                return Ok(());
            }

            for (entry, outcome) in outcomes {
                let label = match &outcome {
                    UndoOutcome::Undone => "Undone".to_string(),
                    UndoOutcome::WouldUndo => "Would undo".to_string(),
                    UndoOutcome::Missing => "Missing, skipped".to_string(),
                    UndoOutcome::Occupied => "Original location taken, skipped".to_string(),
                    UndoOutcome::Failed(reason) => format!("Failed ({}), skipped", reason),
                };
                println!("{}: {} -> {}",
                    label,
                    entry.new_path.display(),
                    entry.original_path.display()
                );
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing history");
                return Ok(());
            }
            history.clear()?;
            println!("History cleared");
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Base directory: {:?}", config.base_path());
            println!("  Watch paths: {:?}", config.watch_dirs());
            println!("  Classifier: {}", config.classifier.url);
            println!("  Top-level categories: {}", config.taxonomy.len());
        }
    }

    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    let client = HttpClassifier::new(&config.classifier)?;

    println!("Arbor v{} Status", env!("CARGO_PKG_VERSION"));
    println!("===================");

    match client.health_check().await {
        Ok(()) => println!("Classifier: Reachable ({})", client.url()),
        Err(e) => println!("Classifier: Error - {}", e),
    }

    let base = config.base_path();
    let tree = open_tree(&config);
    println!("\nCategory tree ({}):", base.display());
    println!("  Directory exists: {}", base.is_dir());
    println!("  Categories: {}", tree.len().saturating_sub(1));
    println!("  Leaf categories: {}", tree.leaves().len());

    let history = History::new(config.history_path());
    let registry = ProcessedRegistry::load(config.registry_path());
    println!("\nData ({}):", config.data_path().display());
    println!("  History entries: {}", history.read_all()?.len());
    println!("  Processed files: {}", registry.len());

    println!("\nConfiguration:");
    println!("  Watch paths: {:?}", config.watch_dirs());
    println!("  Rename on conflict: {}", config.rules.rename_on_conflict);

    Ok(())
}

/// Initialize a new Arbor workspace
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(ArborError::Config(
            "config.json already exists. Use --force to overwrite".to_string()
        ));
    }

    let inbox = target.join("inbox");
    let base = target.join("Subjects");
    std::fs::create_dir_all(&inbox)?;

    let config = AppConfig {
        base_dir: base.to_string_lossy().into_owned(),
        watch_paths: vec![inbox.to_string_lossy().into_owned()],
        data_dir: target.join(".arbor").to_string_lossy().into_owned(),
        ..AppConfig::default()
    };

    // Lay out the taxonomy on disk
    let tree = config.initial_tree();
    let resolver = PathResolver::new(config.base_path());
    for id in tree.leaves() {
        std::fs::create_dir_all(resolver.resolve(&tree, id))?;
    }
    config.save(&config_path)?;

    println!("Arbor initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("  - inbox/");
    println!("  - Subjects/ ({} categories)", tree.leaves().len());
    println!("\nNext steps:");
    println!("  1. Start the classification service at {}", config.classifier.url);
    println!("  2. Start sorting: arbor watch");

    Ok(())
}
