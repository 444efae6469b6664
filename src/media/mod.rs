//! Media references and their downloader.
//!
//! Records carry [`MediaReference`]s for the images they point at. The
//! [`MediaDownloader`] fetches them idempotently and updates each reference
//! in place; a failed download leaves the record usable without local media.

mod downloader;
mod error;
mod filename;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use downloader::{DownloadOutcome, DownloadSummary, MediaDownloader};
pub use error::DownloadError;
pub use filename::{destination_name, extension_for_content_type, hashed_name};

/// Download status of a media reference.
///
/// The local path lives inside the `Downloaded` variant, so it exists
/// exactly when the download succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaState {
    /// Not yet attempted
    #[default]
    Pending,
    /// Stored locally
    Downloaded {
        /// Where the file lives
        local_path: PathBuf,
    },
    /// Gave up; any partial file was removed
    Failed {
        /// Last error message
        reason: String,
    },
}

/// A remote media asset embedded in a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Remote URL
    pub remote_url: String,
    /// Download status
    #[serde(default)]
    pub state: MediaState,
    /// Preferred local file name, when the platform dictates one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl MediaReference {
    /// Creates a pending reference.
    #[must_use]
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            state: MediaState::Pending,
            file_name: None,
        }
    }

    /// Creates a pending reference with a fixed local file name.
    #[must_use]
    pub fn named(remote_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::new(remote_url)
        }
    }

    /// Local path, present only after a successful download.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match &self.state {
            MediaState::Downloaded { local_path } => Some(local_path),
            _ => None,
        }
    }

    /// Whether the asset is stored locally.
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        matches!(self.state, MediaState::Downloaded { .. })
    }

    /// Marks the reference downloaded.
    pub fn mark_downloaded(&mut self, local_path: impl Into<PathBuf>) {
        self.state = MediaState::Downloaded {
            local_path: local_path.into(),
        };
    }

    /// Marks the reference failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = MediaState::Failed {
            reason: reason.into(),
        };
    }
}
