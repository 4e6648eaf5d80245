//! Directory traversal: find the directories that hold uploadable media.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::media;

/// System and tool-private directories never worth uploading (compared
/// lower-cased).
const SKIP_DIRECTORIES: &[&str] = &[
    ".aux",
    ".tmp",
    ".temp",
    "$recycle.bin",
    "system volume information",
    ".trashes",
    ".ds_store",
    "thumbs.db",
    "@eadir",
    ".@__thumb",
    ".picasa",
    ".picasaoriginals",
];

/// A directory with at least one supported file directly inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDirectory {
    pub path: PathBuf,
    /// Supported files, sorted by path.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Deepest first; equal depths ordered by path.
    pub directories: Vec<MediaDirectory>,
    pub skipped_directories: usize,
}

impl ScanResult {
    pub fn file_count(&self) -> usize {
        self.directories.iter().map(|d| d.files.len()).sum()
    }
}

/// Hidden directories, names starting with `$` or `@`, and the known system
/// directories above.
pub fn should_skip_directory(name: &str) -> bool {
    let lower = name.to_lowercase();
    if SKIP_DIRECTORIES.contains(&lower.as_str()) {
        return true;
    }
    (lower.starts_with('.') && lower.len() > 1) || lower.starts_with('$') || lower.starts_with('@')
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && should_skip_directory(&entry.file_name().to_string_lossy())
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

/// Walk `base` synchronously. Unreadable entries are logged and skipped.
pub fn scan_media_blocking(base: &Path) -> std::io::Result<ScanResult> {
    if !base.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", base.display()),
        ));
    }

    let mut by_dir: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut skipped = 0usize;
    let walker = WalkDir::new(base).into_iter().filter_entry(|e| {
        if is_skipped_dir(e) {
            tracing::debug!("Skipping system directory {}", e.path().display());
            skipped += 1;
            false
        } else {
            true
        }
    });

    for entry_result in walker {
        let entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cannot read entry during scan: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        if !media::is_supported(path) || !path.is_file() {
            continue;
        }
        if let Some(parent) = path.parent() {
            by_dir
                .entry(parent.to_path_buf())
                .or_default()
                .push(path.to_path_buf());
        }
    }

    let mut directories: Vec<MediaDirectory> = by_dir
        .into_iter()
        .map(|(path, mut files)| {
            files.sort();
            MediaDirectory { path, files }
        })
        .collect();
    directories.sort_by(|a, b| {
        depth(&b.path)
            .cmp(&depth(&a.path))
            .then_with(|| a.path.cmp(&b.path))
    });

    if skipped > 0 {
        tracing::info!("Skipped {} system/hidden directories", skipped);
    }
    Ok(ScanResult {
        directories,
        skipped_directories: skipped,
    })
}

/// [`scan_media_blocking`] on the blocking pool.
pub async fn scan_media(base: &Path) -> std::io::Result<ScanResult> {
    let base = base.to_path_buf();
    tokio::task::spawn_blocking(move || scan_media_blocking(&base))
        .await
        .map_err(std::io::Error::other)?
}
