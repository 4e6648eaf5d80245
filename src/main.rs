//! gphotos-backup: resumable, quota-aware backup of a local photo tree to
//! Google Photos.
//!
//! Each directory with media becomes an album. Progress and request usage
//! are persisted per base directory after every file, so an interrupted or
//! quota-limited run resumes exactly where it stopped.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod photos;
mod quota;
mod retry;
mod shutdown;
mod state;
mod types;
mod upload;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{BackupConfig, Config, StateAction};
use quota::{QuotaLimits, QuotaTracker};
use state::{StateOrigin, StateStore};

/// Apply `--reset-state`, `--reset-quota-only` or `--set-quota-usage` before
/// the run starts.
async fn apply_state_action(
    store: &StateStore,
    quota: &QuotaTracker,
    backup: &BackupConfig,
) -> anyhow::Result<()> {
    let base = &backup.upload.base_directory;
    if backup.state_action == StateAction::Keep {
        return Ok(());
    }
    if backup.dry_run {
        tracing::warn!("Dry run: ignoring state reset options");
        return Ok(());
    }

    let _lock = store.lock(base).await?;
    match backup.state_action {
        StateAction::Keep => {}
        StateAction::Reset => {
            if store.discard(base).await? {
                tracing::info!("State reset, starting fresh");
            } else {
                tracing::info!("No state to reset for {}", base.display());
            }
        }
        StateAction::ResetQuotaOnly => {
            store.reset_quota_only(base, quota).await?;
            tracing::info!("Quota counters reset, upload progress preserved");
        }
        StateAction::SetQuotaUsage(n) => {
            store.set_quota_usage(base, quota, n).await?;
            tracing::info!(
                "Daily quota set to {}, session reset to 0, upload progress preserved",
                n
            );
        }
    }
    Ok(())
}

/// Run the backup command. Returns the process exit code.
async fn run_backup(config: &Config, args: cli::BackupArgs) -> anyhow::Result<i32> {
    let backup = BackupConfig::from_args(args)?;
    let store = StateStore::new(&config.state_dir);
    let quota = QuotaTracker::new(backup.quota);
    let base = &backup.upload.base_directory;

    tracing::info!("Starting gphotos-backup for {}", base.display());
    tracing::info!(
        naming = ?backup.upload.naming,
        existing = ?backup.upload.existing_policy,
        max_requests = backup.quota.max_session_requests,
        max_daily_requests = backup.quota.max_daily_requests,
        dry_run = backup.dry_run,
        "Configuration"
    );

    apply_state_action(&store, &quota, &backup).await?;

    if backup.dry_run {
        let summary = upload::plan_backup(&store, &quota, &backup.upload).await?;
        println!("{}", summary);
        return Ok(0);
    }

    let auth = auth::OAuthTokenProvider::new(&config.token_file).with_context(|| {
        format!(
            "Cannot load OAuth token from {}; authorize once and save the token there",
            config.token_file.display()
        )
    })?;
    let client = photos::GooglePhotosClient::new(Arc::new(auth))?;

    let shutdown_token = shutdown::install_signal_handler();
    let report =
        upload::run_backup(&client, &store, &quota, &backup.upload, shutdown_token).await?;

    println!("{}", report);
    println!("stop_reason={}", report.outcome.as_str());
    Ok(report.outcome.exit_code())
}

/// Run the status command.
async fn run_status(config: &Config, args: cli::StatusArgs) -> anyhow::Result<()> {
    let store = StateStore::new(&config.state_dir);
    let quota = QuotaTracker::new(QuotaLimits::default());
    let base = config::resolve_base_directory(&args.directory);

    let loaded = store.load(&base, quota.today()).await;
    if loaded.origin == StateOrigin::Fresh {
        println!("No state found for {}", base.display());
        println!("Run a backup first to create it.");
        return Ok(());
    }
    let state = loaded.state;

    println!("State file: {}", store.state_path(&base).display());
    println!("Base directory: {}", state.base_directory.display());
    println!();
    println!("Files:");
    println!("  Uploaded: {}", state.uploaded_files.len());
    println!("  Failed:   {}", state.failed_uploads.len());
    println!("  Albums:   {}", state.created_albums.len());
    println!();
    println!(
        "Last update: {}",
        state.last_updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(reason) = &state.session.stop_reason {
        println!("Last run ended: {}", reason);
    }
    if let Some(dir) = &state.session.last_processed_directory {
        println!("Last directory: {}", dir.display());
    }
    println!();
    println!("Quota:");
    println!("{}", quota.status(&state));

    if args.failed && !state.failed_uploads.is_empty() {
        println!();
        println!("Failed files:");
        for (path, failure) in &state.failed_uploads {
            println!(
                "  {} ({} attempts) - {}",
                path.display(),
                failure.attempts,
                failure.error
            );
        }
    }

    Ok(())
}

/// Run the list-states command.
async fn run_list_states(config: &Config) -> anyhow::Result<()> {
    let store = StateStore::new(&config.state_dir);
    let summaries = store.list_all().await?;
    if summaries.is_empty() {
        println!("No state files in {}", store.dir().display());
        return Ok(());
    }

    println!("State files in {}:", store.dir().display());
    for summary in summaries {
        println!();
        println!("  {}", summary.file_name);
        println!("    Base directory: {}", summary.base_directory.display());
        println!(
            "    Uploaded: {}, failed: {}, albums: {}",
            summary.uploaded, summary.failed, summary.albums
        );
        println!(
            "    Daily requests: {} on {}",
            summary.daily_quota.total_requests, summary.daily_quota.date
        );
        println!(
            "    Last update: {} ({})",
            summary.last_updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            summary.last_stop_reason.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli);
    let exit_code = match cli.command {
        Command::Backup(args) => run_backup(&config, args).await?,
        Command::Status(args) => {
            run_status(&config, args).await?;
            0
        }
        Command::ListStates => {
            run_list_states(&config).await?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
