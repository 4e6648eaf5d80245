//! Persistent backup state.
//!
//! One JSON file per base directory records which files were uploaded, which
//! failed and how often, the albums created so far, and the quota counters.
//! It is what makes an interrupted run resumable.

pub mod error;
pub mod store;
pub mod types;

pub use store::{normalize_base_directory, StateOrigin, StateStore};
pub use types::BackupState;
