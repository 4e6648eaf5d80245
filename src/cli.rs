use clap::{Args, Parser, Subcommand};

use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "gphotos-backup",
    version,
    about = "Back up a local photo tree to Google Photos, one album per directory"
)]
pub struct Cli {
    /// Directory holding one state file per backed-up base directory
    #[arg(
        long,
        global = true,
        env = "GPHOTOS_BACKUP_STATE_DIR",
        default_value = "~/.gphotos-backup/states"
    )]
    pub state_dir: String,

    /// OAuth token file (authorized-user JSON)
    #[arg(
        long,
        global = true,
        env = "GPHOTOS_BACKUP_TOKEN_FILE",
        default_value = "~/.gphotos-backup/token.json"
    )]
    pub token_file: String,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload new media under DIR
    Backup(BackupArgs),
    /// Show quota usage and progress for DIR
    Status(StatusArgs),
    /// List every known state file
    ListStates,
}

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Base directory to back up
    pub directory: String,

    /// How directory paths become album names
    #[arg(long, value_enum, default_value = "relative")]
    pub album_naming: AlbumNaming,

    /// Put every file into this single album
    #[arg(long)]
    pub album_name: Option<String>,

    /// Defer directories whose album already exists remotely
    #[arg(long, conflicts_with = "merge_existing")]
    pub skip_existing: bool,

    /// Upload into albums that already exist remotely
    #[arg(long)]
    pub merge_existing: bool,

    /// Scan and report what would be uploaded, without remote calls
    #[arg(long)]
    pub dry_run: bool,

    /// Attempts per file before it is skipped in later runs
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Base backoff delay in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Request ceiling for this run
    #[arg(long, default_value_t = crate::quota::DEFAULT_MAX_SESSION_REQUESTS)]
    pub max_requests: u64,

    /// Request ceiling per Pacific-time day
    #[arg(long, default_value_t = crate::quota::DEFAULT_MAX_DAILY_REQUESTS)]
    pub max_daily_requests: u64,

    /// Delete the state file for DIR before running
    #[arg(long, conflicts_with_all = ["reset_quota_only", "set_quota_usage"])]
    pub reset_state: bool,

    /// Zero today's request counter, keeping upload history
    #[arg(long, conflicts_with = "set_quota_usage")]
    pub reset_quota_only: bool,

    /// Overwrite today's request counter (e.g. with the value from the Cloud Console)
    #[arg(long, value_name = "N")]
    pub set_quota_usage: Option<u64>,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Base directory whose state to show
    pub directory: String,

    /// List failed files with their last error
    #[arg(long)]
    pub failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_defaults() {
        let cli = Cli::try_parse_from(["gphotos-backup", "backup", "~/pics"]).unwrap();
        let Command::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(args.directory, "~/pics");
        assert_eq!(args.album_naming, AlbumNaming::Relative);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.max_requests, 9_500);
        assert_eq!(args.max_daily_requests, 10_000);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gphotos-backup",
            "status",
            "/data/pics",
            "--failed",
            "--state-dir",
            "/tmp/states",
            "--log-level",
            "warn",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, "/tmp/states");
        assert_eq!(cli.log_level, LogLevel::Warn);
        assert!(matches!(cli.command, Command::Status(StatusArgs { failed: true, .. })));
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        assert!(Cli::try_parse_from([
            "gphotos-backup",
            "backup",
            "d",
            "--skip-existing",
            "--merge-existing"
        ])
        .is_err());
        assert!(Cli::try_parse_from([
            "gphotos-backup",
            "backup",
            "d",
            "--reset-state",
            "--set-quota-usage",
            "5"
        ])
        .is_err());
    }

    #[test]
    fn test_list_states() {
        let cli = Cli::try_parse_from(["gphotos-backup", "list-states"]).unwrap();
        assert!(matches!(cli.command, Command::ListStates));
    }
}
