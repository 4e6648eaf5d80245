//! JSON state files, one per base directory.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use fs4::fs_std::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs;

use super::error::StateError;
use super::types::{BackupState, StateSummary};
use crate::quota::QuotaTracker;

const STATE_FILE_PREFIX: &str = "state_";
const STATE_FILE_SUFFIX: &str = ".json";
const UNSAFE_FILENAME_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Where a loaded state came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOrigin {
    /// No state file existed; a new state was created.
    Fresh,
    /// An existing state file was read.
    Loaded,
    /// The state file was unusable; a new state was created in its place.
    Recovered(String),
}

#[derive(Debug)]
pub struct LoadedState {
    pub state: BackupState,
    pub origin: StateOrigin,
}

/// Held for the duration of a mutating command. The advisory lock is
/// released when the file handle is dropped.
#[derive(Debug)]
pub struct StateLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl StateLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Normalize a base directory into the absolute path used as state identity.
///
/// Existing directories are canonicalized (symlinks resolved); otherwise the
/// path is made absolute and `.`/`..` are folded lexically.
pub fn normalize_base_directory(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Readable slug of a path: lower-cased, separators and characters that are
/// unsafe in filenames replaced by `-`, runs of `-` collapsed.
pub fn slugify(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if UNSAFE_FILENAME_CHARS.contains(&c) { '-' } else { c };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.extend(c.to_lowercase());
    }
    slug.trim_matches('-').to_string()
}

fn path_digest(path: &Path) -> String {
    let hash = Sha256::digest(path.to_string_lossy().as_bytes());
    hash.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// State filename for a normalized base directory.
///
/// The slug keeps the name recognizable; the digest of the exact path keeps
/// distinct paths apart when their slugs coincide (`/a/B` vs `/a/b`).
pub fn state_file_name(base: &Path) -> String {
    format!(
        "{}{}-{}{}",
        STATE_FILE_PREFIX,
        slugify(base),
        path_digest(base),
        STATE_FILE_SUFFIX
    )
}

/// Filename used before the digest suffix was introduced.
fn legacy_state_file_name(base: &Path) -> String {
    format!("{}{}{}", STATE_FILE_PREFIX, slugify(base), STATE_FILE_SUFFIX)
}

pub struct StateStore {
    dir: PathBuf,
    /// Bases loaded from an old-name file that the next save supersedes.
    migrating: Mutex<HashSet<PathBuf>>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            migrating: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, base: &Path) -> PathBuf {
        self.dir.join(state_file_name(base))
    }

    fn legacy_state_path(&self, base: &Path) -> PathBuf {
        self.dir.join(legacy_state_file_name(base))
    }

    fn lock_path(&self, base: &Path) -> PathBuf {
        self.state_path(base).with_extension("lock")
    }

    async fn ensure_dir(&self) -> Result<(), StateError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StateError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Acquire the exclusive lock for `base`, failing fast if another
    /// process already holds it.
    pub async fn lock(&self, base: &Path) -> Result<StateLock, StateError> {
        self.ensure_dir().await?;
        let lock_path = self.lock_path(base);
        let base = base.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::create(&lock_path).map_err(|source| StateError::Lock {
                path: lock_path.clone(),
                source,
            })?;
            file.try_lock_exclusive().map_err(|_| StateError::Locked {
                base,
                lock: lock_path.clone(),
            })?;
            Ok(StateLock {
                _file: file,
                path: lock_path,
            })
        })
        .await?
    }

    /// Load the state for `base`. Never fails: a missing file yields a fresh
    /// state, an unreadable or foreign one a fresh state plus a warning.
    pub async fn load(&self, base: &Path, today: NaiveDate) -> LoadedState {
        let path = self.state_path(base);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return self.load_legacy(base, today).await;
            }
            Err(e) => {
                return recovered(base, today, format!("cannot read {}: {}", path.display(), e));
            }
        };
        match parse_state(&contents, base) {
            Ok(state) => {
                tracing::info!("Loaded existing state from {}", path.display());
                LoadedState {
                    state,
                    origin: StateOrigin::Loaded,
                }
            }
            Err(reason) => recovered(base, today, format!("{}: {}", path.display(), reason)),
        }
    }

    async fn load_legacy(&self, base: &Path, today: NaiveDate) -> LoadedState {
        let legacy = self.legacy_state_path(base);
        if let Ok(contents) = fs::read_to_string(&legacy).await {
            if let Ok(state) = parse_state(&contents, base) {
                if let Ok(mut migrating) = self.migrating.lock() {
                    migrating.insert(base.to_path_buf());
                }
                tracing::info!(
                    "Loaded state from legacy file {}, next save writes {}",
                    legacy.display(),
                    self.state_path(base).display()
                );
                return LoadedState {
                    state,
                    origin: StateOrigin::Loaded,
                };
            }
        }
        tracing::info!("No existing state for {}, starting fresh", base.display());
        LoadedState {
            state: BackupState::new(base.to_path_buf(), today),
            origin: StateOrigin::Fresh,
        }
    }

    /// Persist `state`, refreshing `last_updated_at`. The file is written to a
    /// temporary sibling and renamed over the target so a crash never leaves
    /// a truncated state behind.
    pub async fn save(&self, state: &mut BackupState) -> Result<(), StateError> {
        self.ensure_dir().await?;
        state.last_updated_at = Utc::now();
        let json = serde_json::to_string_pretty(state)?;

        let path = self.state_path(&state.base_directory);
        let tmp_path = path.with_extension("json.tmp");
        if let Err(source) = fs::write(&tmp_path, json.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StateError::Write { path: tmp_path, source });
        }
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StateError::Write {
                path: path.clone(),
                source,
            })?;
        tracing::debug!("State saved to {}", path.display());
        self.remove_legacy(&state.base_directory).await;
        Ok(())
    }

    /// Drop the old-name file once the hashed file holds the state, so
    /// `list_all` never shows the same base twice.
    async fn remove_legacy(&self, base: &Path) {
        let migrated = self
            .migrating
            .lock()
            .map(|mut migrating| migrating.remove(base))
            .unwrap_or(false);
        if !migrated {
            return;
        }
        let legacy = self.legacy_state_path(base);
        match fs::remove_file(&legacy).await {
            Ok(()) => tracing::info!("Removed migrated state file {}", legacy.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Cannot remove old state file {}: {}", legacy.display(), e),
        }
    }

    /// Delete the state for `base` (current and legacy names). Returns
    /// whether anything was removed.
    pub async fn discard(&self, base: &Path) -> Result<bool, StateError> {
        let mut removed = false;
        for path in [self.state_path(base), self.legacy_state_path(base)] {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("Deleted state file {}", path.display());
                    removed = true;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(StateError::Remove { path, source }),
            }
        }
        Ok(removed)
    }

    /// Zero the quota counters for `base`, keeping upload progress.
    pub async fn reset_quota_only(
        &self,
        base: &Path,
        quota: &QuotaTracker,
    ) -> Result<BackupState, StateError> {
        let mut state = self.load(base, quota.today()).await.state;
        quota.reset(&mut state);
        self.save(&mut state).await?;
        Ok(state)
    }

    /// Overwrite today's usage for `base` with a value read from the
    /// service's own console.
    pub async fn set_quota_usage(
        &self,
        base: &Path,
        quota: &QuotaTracker,
        requests: u64,
    ) -> Result<BackupState, StateError> {
        let mut state = self.load(base, quota.today()).await.state;
        quota.set_daily_usage(&mut state, requests);
        self.save(&mut state).await?;
        Ok(state)
    }

    /// Summaries of every readable state file in the directory.
    pub async fn list_all(&self) -> Result<Vec<StateSummary>, StateError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StateError::ReadDir {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut summaries = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(StateError::ReadDir {
                        path: self.dir.clone(),
                        source,
                    })
                }
            };
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(STATE_FILE_PREFIX) || !file_name.ends_with(STATE_FILE_SUFFIX)
            {
                continue;
            }
            let parsed = fs::read_to_string(entry.path())
                .await
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<BackupState>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(state) => summaries.push(StateSummary::from_state(file_name, &state)),
                Err(e) => tracing::warn!("Skipping unreadable state file {}: {}", file_name, e),
            }
        }
        summaries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(summaries)
    }
}

fn parse_state(contents: &str, base: &Path) -> Result<BackupState, String> {
    let state: BackupState =
        serde_json::from_str(contents).map_err(|e| format!("invalid state file: {}", e))?;
    if state.base_directory != base {
        return Err(format!(
            "state belongs to {}, not {}",
            state.base_directory.display(),
            base.display()
        ));
    }
    Ok(state)
}

fn recovered(base: &Path, today: NaiveDate, reason: String) -> LoadedState {
    tracing::warn!(
        "State file unusable ({}); starting fresh, previous progress tracking is lost",
        reason
    );
    LoadedState {
        state: BackupState::new(base.to_path_buf(), today),
        origin: StateOrigin::Recovered(reason),
    }
}
