//! issue-mirror - JIRA ⇄ GitHub issue reconciliation
//!
//! Main entry point for the issue-mirror CLI. Each invocation runs one batch
//! pass and exits; schedule it externally (cron, CI) for periodic sync.

use clap::{Parser, Subcommand};
use issue_mirror::config::{validate_config_result, SyncConfig, SyncDirection};
use issue_mirror::integrations::{GitHubAdapter, JiraAdapter, SourceStore, TargetStore};
use issue_mirror::reconcile::{Reconciler, StatusReconciler};
use issue_mirror::SyncError;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Exit code for configuration and field validation failures
const EXIT_CONFIG: i32 = 2;
/// Exit code for a completed `--strict` run that recorded per-issue errors
const EXIT_ISSUE_ERRORS: i32 = 1;

/// issue-mirror - keep a JIRA project and a GitHub repository in sync
#[derive(Parser, Debug)]
#[command(name = "issue-mirror")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/issue-mirror/config.yaml)
    #[arg(short, long, env = "ISSUE_MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Log progress at info level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one reconciliation pass
    Sync {
        /// Override the configured direction
        /// (source_to_target, target_to_source, bidirectional)
        #[arg(short, long)]
        direction: Option<String>,

        /// Decide everything, write nothing
        #[arg(long)]
        dry_run: bool,

        /// Exit non-zero when any issue failed
        #[arg(long)]
        strict: bool,
    },

    /// Check the configuration and required source fields
    Validate,

    /// Print the forward and reverse status tables
    StatusMap,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = issue_mirror::logging::init(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            if let SyncError::Validation(report) = &e {
                eprintln!("{}", report);
            }
            let code = if e.is_fatal() { EXIT_CONFIG } else { 1 };
            process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> issue_mirror::Result<i32> {
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Sync {
            direction,
            dry_run,
            strict,
        } => {
            if let Some(direction) = direction {
                config.direction = SyncDirection::parse(&direction).ok_or_else(|| {
                    SyncError::Config(format!(
                        "Unknown direction '{}' (expected source_to_target, target_to_source or bidirectional)",
                        direction
                    ))
                })?;
            }
            config.dry_run |= dry_run;

            let engine = build_engine(config)?;
            let report = engine.run().await?;
            print!("{}", report);

            if strict && report.has_errors() {
                Ok(EXIT_ISSUE_ERRORS)
            } else {
                Ok(0)
            }
        }
        Commands::Validate => {
            let engine = build_engine(config)?;
            let report = engine.validate().await?;
            println!("{}", report);
            if report.valid {
                Ok(0)
            } else {
                Ok(EXIT_CONFIG)
            }
        }
        Commands::StatusMap => {
            print_status_map(&config);
            Ok(0)
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> issue_mirror::Result<SyncConfig> {
    let config = match path {
        Some(path) => SyncConfig::load(path)?,
        None => match SyncConfig::load_default() {
            Ok(config) => config,
            Err(SyncError::Config(msg)) if msg.contains("Config file not found") => {
                return Err(SyncError::Config(format!(
                    "No configuration found at {}.\n\n\
                     Create one or pass --config <path>.",
                    SyncConfig::default_path().display()
                )));
            }
            Err(e) => return Err(e),
        },
    };

    validate_config_result(&config)?;
    Ok(config)
}

fn build_engine(config: SyncConfig) -> issue_mirror::Result<Reconciler> {
    let jira = JiraAdapter::new(config.source.clone())?;
    if !jira.is_authenticated() {
        tracing::warn!(env = %config.source.token_env, "JIRA token not set; requests are anonymous");
    }
    let github = GitHubAdapter::new(config.target.clone())?;

    let source: Arc<dyn SourceStore> = Arc::new(jira);
    let target: Arc<dyn TargetStore> = Arc::new(github);
    Ok(Reconciler::new(config, source, target))
}

fn print_status_map(config: &SyncConfig) {
    let status = StatusReconciler::new(&config.status_map, config.column_label_prefix.clone());

    println!("Forward (source status -> target):");
    for (name, target) in status.forward_entries() {
        let state = target
            .target_state
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let column = target
            .target_column
            .as_ref()
            .map(|c| format!("{}{}", status.column_prefix(), c))
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} state: {:<7} label: {}", name, state, column);
    }

    println!();
    println!("Reverse (target -> source status):");
    for (target, statuses) in status.reverse_table() {
        let flag = if statuses.len() > 1 { "  [ambiguous, skipped]" } else { "" };
        println!("  {:<24} {}{}", target, statuses.join(", "), flag);
    }
}
