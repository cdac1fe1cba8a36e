//! Error types for store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading, committing or persisting a [`crate::MemoryStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The table lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Reading or writing the snapshot file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Snapshot file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot file is not valid JSON for the table layout.
    #[error("malformed snapshot {path}: {source}")]
    Snapshot {
        /// Snapshot file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}
