//! Upload engine: walks the tree leaf-first, resolves one album per
//! directory and uploads each eligible file as one unit (bytes, media item,
//! album attachment), persisting state after every unit.
//!
//! Every remote call goes through [`retry::execute`], so quota is reserved
//! before and committed after each attempt. The run ends with exactly one
//! [`RunOutcome`].

pub mod album;
pub mod media;
pub mod scan;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use self::album::{album_key, sanitize_album_name, AlbumResolver, Resolution};
use self::media::MediaLimits;
use self::scan::ScanResult;
use crate::photos::{ApiError, PhotosApi};
use crate::quota::{
    QuotaLimit, QuotaStatus, QuotaTracker, ADD_TO_ALBUM_COST, CREATE_ALBUM_COST,
    CREATE_MEDIA_ITEM_COST, UPLOAD_BYTES_COST, UPLOAD_UNIT_COST,
};
use crate::retry::{self, CallError, RetryConfig};
use crate::state::{BackupState, StateStore};
use crate::types::{AlbumNaming, ExistingAlbumPolicy};

/// Media items per `batchAddMediaItems` request.
const MAX_ATTACH_BATCH: usize = 50;

/// Subset of application config consumed by the upload engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Normalized absolute path; identity of the state file.
    pub base_directory: PathBuf,
    pub naming: AlbumNaming,
    /// Single album for every file; overrides `naming`.
    pub album_name: Option<String>,
    pub existing_policy: ExistingAlbumPolicy,
    pub retry: RetryConfig,
    pub limits: MediaLimits,
    pub no_progress_bar: bool,
}

impl UploadConfig {
    /// Failed files with at least this many counted attempts are not retried.
    fn max_attempts(&self) -> u32 {
        self.retry.max_retries
    }

    fn album_key_for(&self, directory: &Path) -> String {
        match &self.album_name {
            Some(name) => sanitize_album_name(name),
            None => album_key(directory, &self.base_directory, self.naming),
        }
    }
}

/// Why a run ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QuotaDaily,
    QuotaSession,
    Interrupted,
    /// Retry budget of a transient failure ran out.
    Network,
    Auth,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::QuotaDaily => "quota-daily",
            StopReason::QuotaSession => "quota-session",
            StopReason::Interrupted => "interrupted",
            StopReason::Network => "network",
            StopReason::Auth => "auth",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            StopReason::QuotaDaily | StopReason::QuotaSession => 2,
            StopReason::Network => 3,
            StopReason::Auth => 4,
            StopReason::Interrupted => 130,
        }
    }
}

impl From<QuotaLimit> for StopReason {
    fn from(limit: QuotaLimit) -> Self {
        match limit {
            QuotaLimit::Daily => StopReason::QuotaDaily,
            QuotaLimit::Session => StopReason::QuotaSession,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped(StopReason),
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Stopped(reason) => reason.as_str(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Stopped(reason) => reason.exit_code(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level stop signal carried by a failed call, `None` for failures that
/// only concern the current item.
fn stop_reason(err: &CallError) -> Option<StopReason> {
    match err {
        CallError::QuotaReserve(limit) => Some((*limit).into()),
        CallError::QuotaExhausted(_) => Some(StopReason::QuotaDaily),
        CallError::Auth(_) => Some(StopReason::Auth),
        CallError::RetriesExhausted { .. } => Some(StopReason::Network),
        CallError::Terminal(_) => None,
    }
}

/// The remote API bundled with the retry and quota rules every call obeys.
pub struct Remote<'a> {
    pub api: &'a dyn PhotosApi,
    retry: &'a RetryConfig,
    quota: &'a QuotaTracker,
}

impl<'a> Remote<'a> {
    pub fn new(api: &'a dyn PhotosApi, retry: &'a RetryConfig, quota: &'a QuotaTracker) -> Self {
        Self { api, retry, quota }
    }

    pub async fn call<T, F, Fut>(
        &self,
        state: &mut BackupState,
        cost: u64,
        context: &str,
        operation: F,
    ) -> Result<T, CallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        retry::execute(self.retry, self.quota, state, cost, context, operation).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Starting,
    Scanning,
    ProcessingDirectory,
    UploadingFile,
    Saving,
    Stopped,
}

#[derive(Debug)]
enum FileOutcome {
    Uploaded,
    Failed,
    Stop(StopReason),
}

#[derive(Debug)]
enum AlbumStep {
    Use(String),
    Deferred,
    Failed(String),
    Stop(StopReason),
}

/// What a run did, for the final summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub uploaded: usize,
    pub already_uploaded: usize,
    /// Remote or album failures recorded this run.
    pub failed: usize,
    /// Files rejected locally (format, size).
    pub invalid: usize,
    /// Files skipped because earlier runs used up their attempts.
    pub blocked: usize,
    pub deferred_directories: Vec<PathBuf>,
    pub albums_created: usize,
    /// Earlier uploads added to their album this run.
    pub reattached: usize,
    pub skipped_directories: usize,
    pub quota: QuotaStatus,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── Summary ──")?;
        writeln!(f, "  outcome: {}", self.outcome)?;
        writeln!(
            f,
            "  {} uploaded, {} already uploaded, {} failed, {} invalid, {} blocked",
            self.uploaded, self.already_uploaded, self.failed, self.invalid, self.blocked
        )?;
        writeln!(f, "  albums created: {}", self.albums_created)?;
        if self.reattached > 0 {
            writeln!(f, "  earlier uploads added to albums: {}", self.reattached)?;
        }
        if self.skipped_directories > 0 {
            writeln!(f, "  system/hidden directories skipped: {}", self.skipped_directories)?;
        }
        if !self.deferred_directories.is_empty() {
            writeln!(
                f,
                "  deferred directories (album exists): {}",
                self.deferred_directories.len()
            )?;
            for dir in &self.deferred_directories {
                writeln!(f, "    {}", dir.display())?;
            }
        }
        writeln!(f, "  elapsed: {}", format_duration(self.elapsed))?;
        write!(f, "{}", self.quota)
    }
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (e.g. piped output, cron jobs).
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct BackupRun<'a> {
    remote: Remote<'a>,
    store: &'a StateStore,
    config: &'a UploadConfig,
    shutdown: CancellationToken,
    state: BackupState,
    resolver: AlbumResolver,
    phase: Phase,
    pb: ProgressBar,
    report: RunReport,
    started: Instant,
}

impl<'a> BackupRun<'a> {
    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "phase");
            self.phase = phase;
        }
    }

    async fn save(&mut self) -> Result<()> {
        let previous = self.phase;
        self.enter(Phase::Saving);
        self.store
            .save(&mut self.state)
            .await
            .context("Failed to persist backup state")?;
        self.enter(previous);
        Ok(())
    }

    async fn execute(mut self) -> Result<RunReport> {
        self.enter(Phase::Starting);
        self.state.start_session();
        self.remote.quota.roll_over(&mut self.state);
        self.save().await?;
        let quota = self.remote.quota;
        tracing::info!(
            "Quota: {} requests left today, {} this session",
            quota.remaining_daily(&self.state),
            quota.remaining_session(&self.state)
        );
        if quota.status(&self.state).daily.is_warning() {
            tracing::warn!("Over 80% of today's request quota is already used");
        }

        self.enter(Phase::Scanning);
        let base = self.config.base_directory.clone();
        let scan = scan::scan_media(&base)
            .await
            .with_context(|| format!("Failed to scan {}", base.display()))?;

        let max_attempts = self.config.max_attempts();
        let eligible_total = scan
            .directories
            .iter()
            .flat_map(|d| &d.files)
            .filter(|f| self.state.is_eligible(f, max_attempts))
            .count();
        tracing::info!(
            "Found {} media files in {} directories, {} to upload",
            scan.file_count(),
            scan.directories.len(),
            eligible_total
        );
        self.report.skipped_directories = scan.skipped_directories;
        self.pb = create_progress_bar(self.config.no_progress_bar, eligible_total as u64);

        let outcome = self.process(&scan, eligible_total).await?;
        self.pb.finish_and_clear();
        self.finish(outcome).await
    }

    async fn process(&mut self, scan: &ScanResult, eligible_total: usize) -> Result<RunOutcome> {
        let max_attempts = self.config.max_attempts();

        let needs_album = eligible_total > 0
            || scan
                .directories
                .iter()
                .any(|d| !self.unattached_in(&d.files).is_empty());
        let fixed_album = match &self.config.album_name {
            Some(name) if needs_album => {
                let key = sanitize_album_name(name);
                match self.resolve_album(&key).await? {
                    AlbumStep::Use(id) => Some(id),
                    AlbumStep::Deferred => {
                        self.report
                            .deferred_directories
                            .push(self.config.base_directory.clone());
                        return Ok(RunOutcome::Completed);
                    }
                    AlbumStep::Failed(message) => {
                        let all: Vec<&PathBuf> = scan
                            .directories
                            .iter()
                            .flat_map(|d| &d.files)
                            .filter(|f| self.state.is_eligible(f, max_attempts))
                            .collect();
                        self.fail_files(&all, &message).await?;
                        return Ok(RunOutcome::Completed);
                    }
                    AlbumStep::Stop(reason) => return Ok(RunOutcome::Stopped(reason)),
                }
            }
            _ => None,
        };

        for dir in &scan.directories {
            if self.shutdown.is_cancelled() {
                return Ok(RunOutcome::Stopped(StopReason::Interrupted));
            }
            self.enter(Phase::ProcessingDirectory);
            self.state.session.last_processed_directory = Some(dir.path.clone());

            let mut eligible: Vec<&PathBuf> = Vec::new();
            for file in &dir.files {
                if self.state.is_uploaded(file) {
                    self.report.already_uploaded += 1;
                } else if self.state.is_blocked(file, max_attempts) {
                    self.report.blocked += 1;
                } else {
                    eligible.push(file);
                }
            }
            let unattached = self.unattached_in(&dir.files);
            if eligible.is_empty() && unattached.is_empty() {
                tracing::debug!("Nothing to upload in {}", dir.path.display());
                continue;
            }

            let album_id = match &fixed_album {
                Some(id) => id.clone(),
                None => {
                    let key = self.config.album_key_for(&dir.path);
                    self.pb.suspend(|| {
                        tracing::info!(
                            "Processing {} ({} files) -> album '{}'",
                            dir.path.display(),
                            eligible.len(),
                            key
                        )
                    });
                    match self.resolve_album(&key).await? {
                        AlbumStep::Use(id) => id,
                        AlbumStep::Deferred => {
                            self.report.deferred_directories.push(dir.path.clone());
                            self.pb.inc(eligible.len() as u64);
                            continue;
                        }
                        AlbumStep::Failed(message) => {
                            self.fail_files(&eligible, &message).await?;
                            continue;
                        }
                        AlbumStep::Stop(reason) => return Ok(RunOutcome::Stopped(reason)),
                    }
                }
            };

            if let Some(reason) = self.attach_earlier_uploads(&album_id, unattached).await? {
                return Ok(RunOutcome::Stopped(reason));
            }

            for path in eligible {
                if self.shutdown.is_cancelled() {
                    return Ok(RunOutcome::Stopped(StopReason::Interrupted));
                }
                match self.upload_file(path, &album_id).await? {
                    FileOutcome::Uploaded | FileOutcome::Failed => {}
                    FileOutcome::Stop(reason) => return Ok(RunOutcome::Stopped(reason)),
                }
                self.pb.inc(1);
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn resolve_album(&mut self, key: &str) -> Result<AlbumStep> {
        let step = match self
            .resolver
            .resolve(&self.remote, &mut self.state, key)
            .await
        {
            Ok(Resolution::Reuse(id)) => AlbumStep::Use(id),
            Ok(Resolution::Created(id)) => {
                self.report.albums_created += 1;
                AlbumStep::Use(id)
            }
            Ok(Resolution::Deferred) => AlbumStep::Deferred,
            Err(e) => match stop_reason(&e) {
                Some(reason) => {
                    self.pb.suspend(|| {
                        tracing::error!("Cannot resolve album '{}': {}", key, e)
                    });
                    AlbumStep::Stop(reason)
                }
                None => {
                    self.pb.suspend(|| {
                        tracing::error!("Failed to create album '{}': {}", key, e)
                    });
                    AlbumStep::Failed(format!("Album unavailable: {}", e))
                }
            },
        };
        // Listing and creation spend quota even when nothing was cached.
        self.save().await?;
        Ok(step)
    }

    /// Uploaded files under `files` whose album attachment failed earlier.
    fn unattached_in(&self, files: &[PathBuf]) -> Vec<(PathBuf, String)> {
        files
            .iter()
            .filter_map(|f| {
                self.state
                    .unattached_media_item(f)
                    .map(|id| (f.clone(), id.to_string()))
            })
            .collect()
    }

    /// Retry the album step for earlier uploads, one request per batch.
    /// Returns a stop reason when the run must end.
    async fn attach_earlier_uploads(
        &mut self,
        album_id: &str,
        unattached: Vec<(PathBuf, String)>,
    ) -> Result<Option<StopReason>> {
        let api = self.remote.api;
        for batch in unattached.chunks(MAX_ATTACH_BATCH) {
            let ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();
            let attached = self
                .remote
                .call(&mut self.state, ADD_TO_ALBUM_COST, "add to album", || {
                    api.add_media_to_album(album_id, &ids)
                })
                .await;
            match attached {
                Ok(()) => {
                    for (path, _) in batch {
                        self.state.set_album(path, album_id);
                    }
                    self.report.reattached += batch.len();
                    self.pb.suspend(|| {
                        tracing::info!("Added {} earlier uploads to their album", batch.len())
                    });
                    self.save().await?;
                }
                Err(e) => {
                    self.pb.suspend(|| {
                        tracing::warn!("Cannot add {} earlier uploads to album: {}", batch.len(), e)
                    });
                    self.save().await?;
                    if let Some(reason) = stop_reason(&e) {
                        return Ok(Some(reason));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Record files that cannot be attempted this run, without consuming
    /// their retry budget.
    async fn fail_files(&mut self, files: &[&PathBuf], message: &str) -> Result<()> {
        for path in files {
            self.state
                .mark_failed((*path).clone(), message.to_string(), false);
            self.report.failed += 1;
            self.pb.inc(1);
        }
        self.save().await
    }

    async fn create_media_item(&mut self, path: &Path) -> Result<String, CallError> {
        let api = self.remote.api;
        let mime = media::mime_type(path);
        let file_name = file_name_of(path);
        let token = self
            .remote
            .call(&mut self.state, UPLOAD_BYTES_COST, "upload bytes", || {
                api.upload_bytes(path, mime)
            })
            .await?;
        self.remote
            .call(
                &mut self.state,
                CREATE_MEDIA_ITEM_COST,
                "create media item",
                || api.create_media_item(&token, &file_name),
            )
            .await
    }

    async fn upload_file(&mut self, path: &Path, album_id: &str) -> Result<FileOutcome> {
        self.enter(Phase::UploadingFile);
        self.state.session.files_processed += 1;
        self.pb.set_message(file_name_of(path));

        if let Err(e) = media::validate(path, &self.config.limits).await {
            self.pb
                .suspend(|| tracing::warn!("Skipping {}: {}", path.display(), e));
            self.state
                .mark_failed(path.to_path_buf(), e.to_string(), false);
            self.report.invalid += 1;
            self.save().await?;
            return Ok(FileOutcome::Failed);
        }

        // The whole unit must fit, so a quota stop never leaves a media item
        // created but not attached.
        if let Err(limit) = self.remote.quota.reserve(&self.state, UPLOAD_UNIT_COST) {
            self.pb
                .suspend(|| tracing::warn!("Stopping before {}: {}", path.display(), limit));
            return Ok(FileOutcome::Stop(limit.into()));
        }

        let media_item_id = match self.create_media_item(path).await {
            Ok(id) => id,
            Err(e) => return self.record_failure(path, e).await,
        };

        let api = self.remote.api;
        let attached = self
            .remote
            .call(&mut self.state, ADD_TO_ALBUM_COST, "add to album", || {
                api.add_media_to_album(album_id, std::slice::from_ref(&media_item_id))
            })
            .await;
        let (album, stop) = match attached {
            Ok(()) => (Some(album_id.to_string()), None),
            Err(e) => {
                self.pb.suspend(|| {
                    tracing::warn!(
                        "{} uploaded but not added to its album, retrying next run: {}",
                        path.display(),
                        e
                    )
                });
                (None, stop_reason(&e))
            }
        };

        self.pb.suspend(|| tracing::debug!("Uploaded {}", path.display()));
        self.state
            .mark_uploaded(path.to_path_buf(), media_item_id, album);
        self.report.uploaded += 1;
        self.save().await?;
        Ok(match stop {
            Some(reason) => FileOutcome::Stop(reason),
            None => FileOutcome::Uploaded,
        })
    }

    async fn record_failure(&mut self, path: &Path, err: CallError) -> Result<FileOutcome> {
        let stop = stop_reason(&err);
        // Quota and auth stops say nothing about the file itself.
        if matches!(
            err,
            CallError::Terminal(_) | CallError::RetriesExhausted { .. }
        ) {
            self.pb
                .suspend(|| tracing::error!("Upload failed: {}: {}", path.display(), err));
            self.state
                .mark_failed(path.to_path_buf(), err.to_string(), true);
            self.report.failed += 1;
            self.save().await?;
        } else {
            self.pb
                .suspend(|| tracing::error!("Stopping at {}: {}", path.display(), err));
        }
        Ok(match stop {
            Some(reason) => FileOutcome::Stop(reason),
            None => FileOutcome::Failed,
        })
    }

    async fn finish(mut self, outcome: RunOutcome) -> Result<RunReport> {
        self.enter(Phase::Stopped);
        self.state.session.stop_reason = Some(outcome.as_str().to_string());
        self.save().await?;

        self.report.outcome = outcome;
        self.report.quota = self.remote.quota.status(&self.state);
        self.report.elapsed = self.started.elapsed();
        match outcome {
            RunOutcome::Completed => tracing::info!("Backup completed"),
            RunOutcome::Stopped(reason) => {
                tracing::warn!("Backup stopped: {}; run again to resume", reason.as_str())
            }
        }
        Ok(self.report)
    }
}

/// Run one backup of `config.base_directory`.
///
/// Holds the state lock for the whole run. Per-file problems become
/// `failed_uploads` records; quota, auth, network exhaustion and
/// interruption end the run with the matching [`StopReason`]. `Err` is
/// reserved for local failures (lock held, scan or save failed).
pub async fn run_backup(
    api: &dyn PhotosApi,
    store: &StateStore,
    quota: &QuotaTracker,
    config: &UploadConfig,
    shutdown: CancellationToken,
) -> Result<RunReport> {
    let base = &config.base_directory;
    let lock = store.lock(base).await?;
    tracing::debug!("Holding state lock {}", lock.path().display());
    let loaded = store.load(base, quota.today()).await;
    tracing::debug!(origin = ?loaded.origin, "State loaded for {}", base.display());

    let state = loaded.state;
    let report = RunReport {
        outcome: RunOutcome::Completed,
        uploaded: 0,
        already_uploaded: 0,
        failed: 0,
        invalid: 0,
        blocked: 0,
        deferred_directories: Vec::new(),
        albums_created: 0,
        reattached: 0,
        skipped_directories: 0,
        quota: quota.status(&state),
        elapsed: Duration::ZERO,
    };
    let run = BackupRun {
        remote: Remote::new(api, &config.retry, quota),
        store,
        config,
        shutdown,
        state,
        resolver: AlbumResolver::new(config.existing_policy),
        phase: Phase::Starting,
        pb: ProgressBar::hidden(),
        report,
        started: Instant::now(),
    };
    let report = run.execute().await;
    drop(lock);
    report
}

/// What a run would do, computed without remote calls or state changes.
#[derive(Debug, Clone, Default)]
pub struct DryRunSummary {
    /// Albums that would be created, with the number of files each receives.
    pub albums_to_create: BTreeMap<String, usize>,
    /// Albums already known from earlier runs, with pending file counts.
    pub existing_albums: BTreeMap<String, usize>,
    pub directories: usize,
    pub skipped_directories: usize,
    pub already_uploaded: usize,
    /// Earlier uploads still waiting to be added to their album.
    pub unattached: usize,
    pub blocked: usize,
    pub eligible: usize,
    pub estimated_requests: u64,
}

impl fmt::Display for DryRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "── Dry Run Summary ──")?;
        writeln!(f, "  directories with media: {}", self.directories)?;
        writeln!(f, "  system/hidden directories skipped: {}", self.skipped_directories)?;
        writeln!(f, "  already uploaded: {}", self.already_uploaded)?;
        if self.unattached > 0 {
            writeln!(f, "  uploaded but not yet in an album: {}", self.unattached)?;
        }
        writeln!(f, "  blocked after repeated failures: {}", self.blocked)?;
        writeln!(f, "  files to upload: {}", self.eligible)?;
        writeln!(f, "  albums to create: {}", self.albums_to_create.len())?;
        for (name, count) in &self.albums_to_create {
            writeln!(f, "    {} ({} files)", name, count)?;
        }
        for (name, count) in &self.existing_albums {
            writeln!(f, "    {} (existing, {} files)", name, count)?;
        }
        write!(f, "  estimated requests: {}", self.estimated_requests)
    }
}

/// Dry run: scan and compute album names. Reads the state but never writes
/// it and makes no remote calls.
pub async fn plan_backup(
    store: &StateStore,
    quota: &QuotaTracker,
    config: &UploadConfig,
) -> Result<DryRunSummary> {
    let base = &config.base_directory;
    let state = store.load(base, quota.today()).await.state;
    let scan = scan::scan_media(base)
        .await
        .with_context(|| format!("Failed to scan {}", base.display()))?;
    let max_attempts = config.max_attempts();

    let mut summary = DryRunSummary {
        directories: scan.directories.len(),
        skipped_directories: scan.skipped_directories,
        ..Default::default()
    };
    let mut attach_requests = 0u64;
    for dir in &scan.directories {
        let mut pending = 0usize;
        let mut unattached = 0usize;
        for file in &dir.files {
            if state.unattached_media_item(file).is_some() {
                unattached += 1;
                summary.already_uploaded += 1;
            } else if state.is_uploaded(file) {
                summary.already_uploaded += 1;
            } else if state.is_blocked(file, max_attempts) {
                summary.blocked += 1;
            } else {
                pending += 1;
            }
        }
        if pending == 0 && unattached == 0 {
            continue;
        }
        summary.eligible += pending;
        summary.unattached += unattached;
        attach_requests += unattached.div_ceil(MAX_ATTACH_BATCH) as u64;
        let key = config.album_key_for(&dir.path);
        tracing::info!(
            "[DRY RUN] Would upload {} files from {} to album '{}'",
            pending,
            dir.path.display(),
            key
        );
        let bucket = if state.album_id(&key).is_some() {
            &mut summary.existing_albums
        } else {
            &mut summary.albums_to_create
        };
        *bucket.entry(key).or_default() += pending;
    }
    summary.estimated_requests = summary.eligible as u64 * UPLOAD_UNIT_COST
        + summary.albums_to_create.len() as u64 * CREATE_ALBUM_COST
        + attach_requests * ADD_TO_ALBUM_COST;
    Ok(summary)
}
