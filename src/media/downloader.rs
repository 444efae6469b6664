//! Idempotent, retrying media downloader.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::filename::{destination_name, extension_for_content_type, hashed_name};
use super::{DownloadError, MediaReference};
use crate::retry::RetryPolicy;

/// Extensions probed when looking for an earlier hashed download.
const HASHED_EXTENSIONS: &[&str] = &[".jpg", ".png", ".gif", ".webp", ".bmp", ".tif", ".tmp"];

/// Result of a successful [`MediaDownloader::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The destination already existed; nothing was fetched.
    AlreadyPresent,
    /// The asset was fetched.
    Downloaded {
        /// Bytes written
        bytes: u64,
        /// Response `Content-Type`, if any
        content_type: Option<String>,
    },
}

/// Counts from a [`MediaDownloader::download_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Newly fetched
    pub downloaded: usize,
    /// Already on disk
    pub already_present: usize,
    /// Gave up
    pub failed: usize,
}

/// Downloads media assets into a content directory.
///
/// Every fetch goes through the shared [`RetryPolicy`]; an existing
/// destination file counts as success without a request.
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: Client,
    retry: RetryPolicy,
}

impl MediaDownloader {
    /// Creates a downloader.
    #[must_use]
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Downloads `url` to `dest`.
    ///
    /// The body is streamed to a sibling `.part` file which is renamed into
    /// place on success.
    ///
    /// # Errors
    ///
    /// Returns the last [`DownloadError`] once retries are spent. Any partial
    /// file has been removed by then.
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, DownloadError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            info!(url, "already downloaded");
            return Ok(DownloadOutcome::AlreadyPresent);
        }
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let result = self
            .retry
            .execute("media", |_| self.fetch_once(url, dest))
            .await;

        match result {
            Ok((bytes, content_type)) => {
                info!(url, bytes, "downloaded");
                Ok(DownloadOutcome::Downloaded {
                    bytes,
                    content_type,
                })
            }
            Err(error) => {
                remove_quietly(&part_path(dest)).await;
                remove_quietly(dest).await;
                Err(error.into_inner())
            }
        }
    }

    /// Downloads one reference into `dir` and records the outcome on it.
    ///
    /// The file name is the reference's fixed name, the URL's image file
    /// name, or the SHA-256 of the URL with an extension taken from the
    /// response `Content-Type`.
    ///
    /// # Errors
    ///
    /// Returns the [`DownloadError`] that marked the reference failed.
    pub async fn download_reference(
        &self,
        media: &mut MediaReference,
        dir: &Path,
    ) -> Result<DownloadOutcome, DownloadError> {
        let named = media
            .file_name
            .clone()
            .or_else(|| destination_name(&media.remote_url));

        let result = match named {
            Some(name) => {
                let dest = dir.join(name);
                self.download(&media.remote_url, &dest)
                    .await
                    .map(|outcome| (outcome, dest))
            }
            None => self.download_hashed(&media.remote_url, dir).await,
        };

        match result {
            Ok((outcome, dest)) => {
                media.mark_downloaded(dest);
                Ok(outcome)
            }
            Err(error) => {
                warn!(url = %media.remote_url, error = %error, "media download failed");
                media.mark_failed(error.to_string());
                Err(error)
            }
        }
    }

    async fn download_hashed(
        &self,
        url: &str,
        dir: &Path,
    ) -> Result<(DownloadOutcome, PathBuf), DownloadError> {
        for ext in HASHED_EXTENSIONS {
            let candidate = dir.join(hashed_name(url, ext));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                info!(url, path = %candidate.display(), "already downloaded");
                return Ok((DownloadOutcome::AlreadyPresent, candidate));
            }
        }

        let staged = dir.join(hashed_name(url, ".tmp"));
        let outcome = self.download(url, &staged).await?;
        let ext = match &outcome {
            DownloadOutcome::Downloaded { content_type, .. } => {
                extension_for_content_type(content_type.as_deref())
            }
            DownloadOutcome::AlreadyPresent => ".tmp",
        };
        if ext == ".tmp" {
            return Ok((outcome, staged));
        }

        let dest = dir.join(hashed_name(url, ext));
        tokio::fs::rename(&staged, &dest)
            .await
            .map_err(|e| DownloadError::io(&dest, e))?;
        Ok((outcome, dest))
    }

    /// Downloads every reference not yet stored locally. Failures are
    /// counted and never abort the pass.
    pub async fn download_all<'a, I>(&self, references: I, dir: &Path) -> DownloadSummary
    where
        I: IntoIterator<Item = &'a mut MediaReference>,
    {
        let mut summary = DownloadSummary::default();
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "cannot create media directory");
        }

        for media in references {
            if let Some(path) = media.local_path()
                && tokio::fs::try_exists(path).await.unwrap_or(false)
            {
                summary.already_present += 1;
                continue;
            }
            match self.download_reference(media, dir).await {
                Ok(DownloadOutcome::AlreadyPresent) => summary.already_present += 1,
                Ok(DownloadOutcome::Downloaded { .. }) => summary.downloaded += 1,
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            failed = summary.failed,
            "media pass complete"
        );
        summary
    }

    async fn fetch_once(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<(u64, Option<String>), DownloadError> {
        debug!(url, "fetching media");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let part = part_path(dest);
        let bytes = match stream_to_file(response, url, &part).await {
            Ok(bytes) => bytes,
            Err(error) => {
                remove_quietly(&part).await;
                return Err(error);
            }
        };
        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
        Ok((bytes, content_type))
    }
}

/// Streams a response body into `path`, returning bytes written.
async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(bytes_written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove partial file");
    }
}
