//! Error types for snapshot persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Snapshot read and write failures.
///
/// A snapshot that exists but cannot be understood is always an error;
/// it is never treated as an empty snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The file exists but is not a valid snapshot.
    #[error("corrupt snapshot {path}: {reason}")]
    Corrupt {
        /// Snapshot file
        path: PathBuf,
        /// What could not be decoded
        reason: String,
    },

    /// The file was written by an incompatible schema version.
    #[error("snapshot {path} has schema version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Snapshot file
        path: PathBuf,
        /// Version found on disk
        found: u64,
        /// Version this build reads
        expected: u32,
    },

    /// Filesystem error.
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl SnapshotError {
    /// Creates a corrupt-file error.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
