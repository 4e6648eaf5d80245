//! Types for the persisted backup state.
//!
//! On-disk field names are the compatibility contract with state files
//! written by earlier versions of the tool, hence the `serde(rename)`s.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every state file.
pub const STATE_VERSION: &str = "1.0";

/// Record of the run currently in progress (or the last run, once loaded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    #[serde(rename = "api_requests_count", default)]
    pub requests_count: u64,
    #[serde(default)]
    pub last_processed_directory: Option<PathBuf>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub files_processed: u64,
    #[serde(default)]
    pub files_uploaded: u64,
    #[serde(default)]
    pub files_failed: u64,
}

impl SessionRecord {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            requests_count: 0,
            last_processed_directory: None,
            stop_reason: None,
            files_processed: 0,
            files_uploaded: 0,
            files_failed: 0,
        }
    }
}

/// Requests consumed on one calendar date of the service's quota clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyQuota {
    pub date: NaiveDate,
    pub total_requests: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub uploaded_at: DateTime<Utc>,
    pub media_item_id: String,
    #[serde(default)]
    pub album_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUpload {
    pub error: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(rename = "last_attempt")]
    pub last_attempt_at: DateTime<Utc>,
    #[serde(rename = "first_attempt", default)]
    pub first_attempt_at: Option<DateTime<Utc>>,
}

/// Durable progress of one backup job, keyed by its base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupState {
    pub base_directory: PathBuf,
    #[serde(default = "default_state_version")]
    pub state_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "last_updated")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(rename = "current_session")]
    pub session: SessionRecord,
    pub daily_quota: DailyQuota,
    #[serde(default)]
    pub uploaded_files: BTreeMap<PathBuf, UploadedFile>,
    #[serde(default)]
    pub failed_uploads: BTreeMap<PathBuf, FailedUpload>,
    #[serde(default)]
    pub created_albums: BTreeMap<String, String>,
}

fn default_state_version() -> String {
    STATE_VERSION.to_string()
}

impl BackupState {
    /// Fresh state with empty maps. `today` is the current quota date.
    pub fn new(base_directory: PathBuf, today: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            base_directory,
            state_version: default_state_version(),
            created_at: now,
            last_updated_at: now,
            session: SessionRecord::new(now),
            daily_quota: DailyQuota {
                date: today,
                total_requests: 0,
            },
            uploaded_files: BTreeMap::new(),
            failed_uploads: BTreeMap::new(),
            created_albums: BTreeMap::new(),
        }
    }

    /// Reset the ephemeral session record at the start of a run.
    pub fn start_session(&mut self) {
        self.session = SessionRecord::new(Utc::now());
    }

    pub fn is_uploaded(&self, path: &Path) -> bool {
        self.uploaded_files.contains_key(path)
    }

    /// Whether a previous failure has used up the retry budget for `path`.
    pub fn is_blocked(&self, path: &Path, max_retries: u32) -> bool {
        self.failed_uploads
            .get(path)
            .is_some_and(|f| f.attempts >= max_retries)
    }

    /// A path is eligible when it was neither uploaded nor terminally failed.
    pub fn is_eligible(&self, path: &Path, max_retries: u32) -> bool {
        !self.is_uploaded(path) && !self.is_blocked(path, max_retries)
    }

    /// Record a successful upload, superseding any failure record.
    pub fn mark_uploaded(&mut self, path: PathBuf, media_item_id: String, album_id: Option<String>) {
        self.failed_uploads.remove(&path);
        self.uploaded_files.insert(
            path,
            UploadedFile {
                uploaded_at: Utc::now(),
                media_item_id,
                album_id,
            },
        );
        self.session.files_uploaded += 1;
    }

    /// Record a failure. `count_attempt` is false for local rejections
    /// (validation, album unavailable) that must not consume the retry budget.
    pub fn mark_failed(&mut self, path: PathBuf, error: String, count_attempt: bool) {
        if self.uploaded_files.contains_key(&path) {
            return;
        }
        let now = Utc::now();
        let increment = u32::from(count_attempt);
        self.failed_uploads
            .entry(path)
            .and_modify(|f| {
                f.error.clone_from(&error);
                f.attempts = f.attempts.saturating_add(increment);
                f.last_attempt_at = now;
            })
            .or_insert_with(|| FailedUpload {
                error: error.clone(),
                attempts: increment,
                last_attempt_at: now,
                first_attempt_at: Some(now),
            });
        self.session.files_failed += 1;
    }

    /// Media item id of an upload that never made it into an album.
    pub fn unattached_media_item(&self, path: &Path) -> Option<&str> {
        self.uploaded_files
            .get(path)
            .filter(|u| u.album_id.is_none())
            .map(|u| u.media_item_id.as_str())
    }

    pub fn set_album(&mut self, path: &Path, album_id: &str) {
        if let Some(upload) = self.uploaded_files.get_mut(path) {
            upload.album_id = Some(album_id.to_string());
        }
    }

    pub fn album_id(&self, key: &str) -> Option<&str> {
        self.created_albums.get(key).map(String::as_str)
    }

    pub fn add_created_album(&mut self, key: String, album_id: String) {
        self.created_albums.insert(key, album_id);
    }
}

/// Condensed view of one state file, used by `list-states`.
#[derive(Debug, Clone)]
pub struct StateSummary {
    pub file_name: String,
    pub base_directory: PathBuf,
    pub uploaded: usize,
    pub failed: usize,
    pub albums: usize,
    pub last_updated_at: DateTime<Utc>,
    pub last_stop_reason: Option<String>,
    pub daily_quota: DailyQuota,
}

impl StateSummary {
    pub fn from_state(file_name: String, state: &BackupState) -> Self {
        Self {
            file_name,
            base_directory: state.base_directory.clone(),
            uploaded: state.uploaded_files.len(),
            failed: state.failed_uploads.len(),
            albums: state.created_albums.len(),
            last_updated_at: state.last_updated_at,
            last_stop_reason: state.session.stop_reason.clone(),
            daily_quota: state.daily_quota,
        }
    }
}
