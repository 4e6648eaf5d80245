//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while persisting or locking backup state.
///
/// Reading a damaged state file is deliberately not represented here: the
/// store recovers from it with a fresh state and a warning.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to create the state directory.
    #[error("Failed to create state directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write or replace a state file.
    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to delete a state file.
    #[error("Failed to remove state file {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to list the state directory.
    #[error("Failed to read state directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serializing the state failed.
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Another process holds the lock for this base directory.
    #[error("Another gphotos-backup instance is running for {base} (lock: {lock})")]
    Locked { base: PathBuf, lock: PathBuf },

    /// Failed to create the lock file.
    #[error("Failed to create lock file {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}
