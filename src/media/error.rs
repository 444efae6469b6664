//! Error types for media downloads.

use std::path::PathBuf;

use thiserror::Error;

use crate::retry::{Classify, FailureType};

/// Errors that can occur while downloading a media asset.
///
/// None of these abort an acquisition; the affected reference is marked
/// failed and the run continues.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the asset.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

impl Classify for DownloadError {
    #[allow(clippy::match_same_arms)]
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Network { .. } => FailureType::Transient,
            Self::HttpStatus { status: 429, .. } => FailureType::RateLimited,
            Self::HttpStatus { status: 404 | 410, .. } => FailureType::Permanent,
            Self::HttpStatus { .. } => FailureType::Transient,
            Self::Io { .. } => FailureType::Permanent,
            Self::InvalidUrl { .. } => FailureType::Permanent,
        }
    }
}
