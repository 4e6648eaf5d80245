use std::path::PathBuf;

use crate::cli::{BackupArgs, Cli};
use crate::quota::QuotaLimits;
use crate::retry::RetryConfig;
use crate::state::normalize_base_directory;
use crate::types::ExistingAlbumPolicy;
use crate::upload::album::sanitize_album_name;
use crate::upload::media::MediaLimits;
use crate::upload::UploadConfig;

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub token_file: PathBuf,
}

/// What to do with the stored state before a backup starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    Keep,
    /// Delete the state file entirely.
    Reset,
    /// Zero today's request counter only.
    ResetQuotaOnly,
    /// Overwrite today's request counter.
    SetQuotaUsage(u64),
}

/// Everything the `backup` subcommand needs, validated.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub upload: UploadConfig,
    pub quota: QuotaLimits,
    pub state_action: StateAction,
    pub dry_run: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Expand `~` and normalize to the absolute form used as state identity.
pub fn resolve_base_directory(raw: &str) -> PathBuf {
    normalize_base_directory(&expand_tilde(raw))
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            state_dir: expand_tilde(&cli.state_dir),
            token_file: expand_tilde(&cli.token_file),
        }
    }
}

impl BackupConfig {
    pub fn from_args(args: BackupArgs) -> anyhow::Result<Self> {
        let base_directory = resolve_base_directory(&args.directory);
        if !base_directory.is_dir() {
            anyhow::bail!("Not a directory: {}", base_directory.display());
        }
        if args.max_requests == 0 || args.max_daily_requests == 0 {
            anyhow::bail!("--max-requests and --max-daily-requests must be positive");
        }
        if args.max_retries == 0 {
            anyhow::bail!("--max-retries must be at least 1");
        }
        if args.max_requests > args.max_daily_requests {
            tracing::warn!(
                "--max-requests ({}) exceeds --max-daily-requests ({}); the daily ceiling applies",
                args.max_requests,
                args.max_daily_requests
            );
        }

        let album_name = match args.album_name {
            Some(name) => {
                let sanitized = sanitize_album_name(&name);
                if sanitized.is_empty() {
                    anyhow::bail!("--album-name '{}' is empty after sanitization", name);
                }
                Some(sanitized)
            }
            None => None,
        };

        let existing_policy = if args.skip_existing {
            ExistingAlbumPolicy::Skip
        } else if args.merge_existing {
            ExistingAlbumPolicy::Merge
        } else {
            ExistingAlbumPolicy::Create
        };

        let state_action = if args.reset_state {
            StateAction::Reset
        } else if args.reset_quota_only {
            StateAction::ResetQuotaOnly
        } else if let Some(n) = args.set_quota_usage {
            StateAction::SetQuotaUsage(n)
        } else {
            StateAction::Keep
        };

        Ok(Self {
            upload: UploadConfig {
                base_directory,
                naming: args.album_naming,
                album_name,
                existing_policy,
                retry: RetryConfig {
                    max_retries: args.max_retries,
                    base_delay_secs: args.retry_delay,
                    ..RetryConfig::default()
                },
                limits: MediaLimits::default(),
                no_progress_bar: args.no_progress_bar,
            },
            quota: QuotaLimits {
                max_session_requests: args.max_requests,
                max_daily_requests: args.max_daily_requests,
            },
            state_action,
            dry_run: args.dry_run,
        })
    }
}
