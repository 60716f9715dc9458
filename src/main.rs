// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! vault-triage: AI-assisted inbox triage for a notes vault
//!
//! Drains the inbox backlog, then watches for new notes until stopped.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use vault_triage::classifier::{build_oracle, ClassifierGateway};
use vault_triage::config::AppConfig;
use vault_triage::journal::{Journal, JournalStatus};
use vault_triage::pipeline::{IntakePipeline, RunReport};
use vault_triage::store::VaultStore;
use vault_triage::watcher::{drain_backlog, shutdown_on_signal, InboxWatcher};
use vault_triage::{Result, TriageError};

/// vault-triage CLI - AI-assisted inbox triage for a notes vault
#[derive(Parser, Debug)]
#[command(name = "vault-triage")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Classify new vault inbox notes and file them away", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Path to the vault (default: ./Obsidian_Vault, or `vault_root` from the config)
    #[arg(long, global = true)]
    vault_path: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process the inbox backlog, then watch for new files
    Watch {
        /// Do not process files already in the inbox
        #[arg(long)]
        skip_backlog: bool,

        /// Skip classifier health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Process files currently in the inbox and exit
    Drain,

    /// Inspect the processing journal
    Journal {
        #[command(subcommand)]
        action: JournalCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show vault layout, backlog and classifier status
    Status,
}

#[derive(Subcommand, Debug)]
enum JournalCommands {
    /// List recent journal entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// List files that were moved but never logged
    Unlogged,

    /// Mark unlogged files as fixed after adding their log entries by hand
    Reconcile {
        /// File name, either the original or the name it was filed under
        file: Option<String>,

        /// Required to reconcile every unlogged file at once
        #[arg(long, conflicts_with = "file")]
        all: bool,
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

#[tokio::main]
async fn main() -> Result<ExitCode> {
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

    // Load configuration
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(path) = cli.vault_path {
        config.vault_root = path;
    }

    match cli.command {
        Some(Commands::Watch { skip_backlog, skip_health_check }) => {
            run_watch(config, skip_backlog, skip_health_check).await
        }
        Some(Commands::Drain) => run_drain(config).await,
        Some(Commands::Journal { action }) => run_journal_command(config, action),
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        Some(Commands::Status) => run_status(config).await,
        None => {
            // Default: run watch mode
            run_watch(config, false, false).await
        }
    }
}

/// Resolve the vault root; it must already exist
fn resolve_vault(config: &mut AppConfig) -> Result<()> {
    if !config.vault_root.is_dir() {
        return Err(TriageError::Config(format!(
            "Vault path {:?} does not exist",
            config.vault_root
        )));
    }
    config.vault_root = std::fs::canonicalize(&config.vault_root)?;
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<VaultStore>> {
    let store = VaultStore::open(&config.vault_root, &config.vault);
    store.ensure_layout()?;
    Ok(Arc::new(store))
}

fn build_pipeline(config: &AppConfig, store: Arc<VaultStore>) -> Result<Arc<IntakePipeline>> {
    let oracle = build_oracle(&config.classifier)?;
    let gateway = Arc::new(ClassifierGateway::new(oracle, &config.classifier));
    info!("Classifier: {} (timeout {}s)", gateway.oracle_name(), config.classifier.timeout_secs);

    let mut pipeline = IntakePipeline::new(store, gateway);
    if config.journal.enabled {
        let path = config.journal_path();
        info!("Journal: {:?}", path);
        pipeline = pipeline.with_journal(Arc::new(Journal::new(path)));
    }
    Ok(Arc::new(pipeline))
}

/// Run the watch mode (main loop)
async fn run_watch(mut config: AppConfig, skip_backlog: bool, skip_health_check: bool) -> Result<ExitCode> {
    config.validate()?;
    resolve_vault(&mut config)?;
    info!("Vault path: {:?}", config.vault_root);

    let store = open_store(&config)?;
    let _lock = store.acquire_lock()?;
    let pipeline = build_pipeline(&config, Arc::clone(&store))?;

    if skip_health_check {
        warn!("Skipping classifier health check");
    } else {
        info!("Checking classifier availability...");
        match pipeline.gateway().health_check().await {
            Ok(()) => info!("Classifier is available"),
            Err(e) => warn!(
                "Classifier check failed: {}. Files will be filed as {} until it recovers",
                e, config.classifier.fallback_category
            ),
        }
    }

    let shutdown = shutdown_on_signal();

    // Subscribe before draining so nothing arriving meanwhile is missed
    let watcher = InboxWatcher::new(&store.layout().inbox, &config.watch)?;

    let mut report = RunReport::default();
    if !skip_backlog {
        report.merge(drain_backlog(&pipeline, &shutdown).await?);
    }

    info!("Scanner active. Press Ctrl+C to stop.");
    report.merge(watcher.run(pipeline, shutdown).await?);

    info!("vault-triage stopped: {}", report);
    Ok(ExitCode::SUCCESS)
}

/// Process the current backlog only
async fn run_drain(mut config: AppConfig) -> Result<ExitCode> {
    config.validate()?;
    resolve_vault(&mut config)?;

    let store = open_store(&config)?;
    let _lock = store.acquire_lock()?;
    let pipeline = build_pipeline(&config, store)?;

    let shutdown = shutdown_on_signal();
    let report = drain_backlog(&pipeline, &shutdown).await?;

    println!("Finished processing inbox: {}", report);

    if report.has_failures() {
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Run journal commands
fn run_journal_command(mut config: AppConfig, action: JournalCommands) -> Result<ExitCode> {
    resolve_vault(&mut config)?;
    let journal = Journal::new(config.journal_path());

    match action {
        JournalCommands::List { count } => {
            let entries = journal.get_recent(count)?;
            println!("Recent journal ({} entries):", entries.len());
            for entry in entries {
                let status = match entry.status {
                    JournalStatus::Completed => "completed",
                    JournalStatus::Duplicate => "duplicate",
                    JournalStatus::Failed => "FAILED",
                    JournalStatus::Unlogged => "UNLOGGED",
                    JournalStatus::Reconciled => "reconciled",
                };
                let category = entry
                    .classification
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {} {:<9} {:<12} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    status,
                    category,
                    entry.file_name
                );
                if let Some(reason) = &entry.degraded {
                    println!("      degraded: {}", reason);
                }
                if let Some(error) = &entry.error {
                    println!("      error: {}", error);
                }
            }
        }
        JournalCommands::Unlogged => {
            let entries = journal.unlogged()?;
            if entries.is_empty() {
                println!("Every moved file has a log entry");
                return Ok(ExitCode::SUCCESS);
            }
            println!("{} file(s) moved without a log entry:", entries.len());
            for entry in entries {
                let dest = entry
                    .destination
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("  {} -> {}", entry.file_name, dest);
            }
            println!(
                "\nAdd their entries to {} by hand, then run `vault-triage journal reconcile`.",
                config.vault.log_file
            );
            return Ok(ExitCode::from(2));
        }
        JournalCommands::Reconcile { file, all } => {
            if file.is_none() && !all {
                return Err(TriageError::Config(
                    "Name a file to reconcile, or pass --all".to_string(),
                ));
            }
            let fixed = journal.reconcile(file.as_deref())?;
            if fixed.is_empty() {
                println!("Nothing to reconcile");
            }
            for entry in fixed {
                info!("Reconciled {}", entry.file_name);
                println!("  reconciled {}", entry.file_name);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<ExitCode> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Vault: {:?}", config.vault_root);
            println!("  Classifier: {:?}", config.classifier.backend);
            println!("  Fallback category: {}", config.classifier.fallback_category);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Run status check
async fn run_status(mut config: AppConfig) -> Result<ExitCode> {
    resolve_vault(&mut config)?;
    let store = VaultStore::open(&config.vault_root, &config.vault);
    let layout = store.layout();

    println!("vault-triage v{} Status", env!("CARGO_PKG_VERSION"));
    println!("========================");

    println!("\nVault ({}):", layout.root.display());
    for (name, path) in [
        ("Inbox", &layout.inbox),
        ("Needs action", &layout.needs_action),
        ("Done", &layout.done),
        ("Log", &layout.log),
    ] {
        let marker = if path.exists() { "ok" } else { "missing" };
        println!("  {:<13} {} ({})", name, path.display(), marker);
    }

    if layout.inbox.is_dir() {
        println!("  Backlog: {} file(s)", store.inbox_files()?.len());
    }

    if layout.root.join(vault_triage::store::LOCK_FILE).exists() {
        println!("  Locked: another instance may be running");
    }

    let oracle = build_oracle(&config.classifier)?;
    println!("\nClassifier ({}):", oracle.name());
    match oracle.health_check().await {
        Ok(()) => println!("  Available"),
        Err(e) => println!("  Error - {}", e),
    }

    if config.journal.enabled {
        let journal = Journal::new(config.journal_path());
        match journal.unlogged() {
            Ok(entries) => println!("\nJournal: {} unlogged file(s)", entries.len()),
            Err(e) => println!("\nJournal: Error - {}", e),
        }
    }

    Ok(ExitCode::SUCCESS)
}
