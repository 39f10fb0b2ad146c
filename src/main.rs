//! Backup Runner - Main entry point
//!
//! Discovers backup targets, then runs the unlock, backup, prune pipeline
//! against the configured restic repository.

use backup_runner::daemon::shutdown::ShutdownCoordinator;
use backup_runner::engine::ResticEngine;
use backup_runner::runner::{JobRunner, JobTag};
use backup_runner::{fs, utils, Config};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tag snapshots as a scheduled run instead of an interactive one
    #[arg(long)]
    scheduled: bool,

    /// Tag snapshots with an arbitrary label
    #[arg(long, conflicts_with = "scheduled")]
    tag: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Unrecognized arguments land here; reported, never fatal
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    extra: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {e:#}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    if let Err(e) = utils::logger::init(log_level) {
        eprintln!("Failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    if !args.extra.is_empty() {
        tracing::warn!("Ignoring unrecognized arguments: {:?}", args.extra);
    }

    // Repository address and credentials for the engine subprocesses
    match &config.repository.env_file {
        Some(env_file) => {
            if let Err(e) = dotenvy::from_path(env_file) {
                tracing::warn!(
                    "Environment file {} not loaded: {}",
                    env_file.display(),
                    e
                );
            }
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let tag = if let Some(label) = &args.tag {
        JobTag::custom(label.clone())
    } else if args.scheduled {
        JobTag::scheduled()
    } else {
        JobTag::interactive()
    };

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!(
        "Starting backup-runner v{} on {} (tag: {})",
        env!("CARGO_PKG_VERSION"),
        host,
        tag
    );

    let resolved = fs::resolve(
        &config.paths.roots,
        &config.paths.user_exclude_filename,
        config.paths.global_exclude_file.as_deref(),
    );

    if resolved.is_empty() {
        tracing::warn!("No backup targets discovered under the configured roots; nothing to do");
        return ExitCode::SUCCESS;
    }

    // Signals cancel the pipeline token; the runner cleans up from there
    let shutdown = ShutdownCoordinator::new();
    shutdown.spawn_signal_listener();

    let engine = ResticEngine::from_config(&config.repository);
    let runner = JobRunner::new(engine, shutdown.cancel_token());

    match runner
        .run(&resolved, &tag, &config.retention, config.repository.connections)
        .await
    {
        Ok(report) => {
            tracing::info!(
                "Backup run {} completed in {:.1}s ({} targets)",
                report.run_id,
                report.duration.as_secs_f64(),
                resolved.targets.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.step() {
                Some(step) => tracing::error!("Backup run aborted due to {} step: {}", step, e),
                None => tracing::error!("Backup run aborted: {}", e),
            }
            ExitCode::from(e.exit_code())
        }
    }
}
