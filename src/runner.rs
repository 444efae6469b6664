//! Platform selection: turns a platform name and a query into a configured
//! collector and runs it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::acquire::Window;
use crate::collector::{ContentCollector, StateOf};
use crate::credentials::{Credentials, Service};
use crate::error::AcquireError;
use crate::media::{MediaDownloader, MediaState};
use crate::platform::{
    ClientBuildError, FeedPaginator, FlickrGroupPaginator, FlickrPhotosetPaginator, HttpSettings,
    InstagramPaginator, Paginator, Record, TumblrBlogPaginator, TumblrTagPaginator,
    TwitterPaginator, build_http_client,
};
use crate::query::{QueryError, SourceDescriptor, TermType, parse, parse_with_default, sanitize_segment};
use crate::retry::{RetrySettings, Sleeper};
use crate::snapshot::{SnapshotId, SnapshotStore};

/// A supported content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    /// User timelines and hashtag search
    Twitter,
    /// Blog posts
    Tumblr,
    /// Tag search across blogs
    TumblrTag,
    /// A user's photosets
    Flickr,
    /// A group's photo pool
    FlickrGroup,
    /// Recent media by hashtag
    Instagram,
    /// RSS or Atom feed
    Feed,
}

impl Platform {
    /// Every platform, in display order.
    pub const ALL: [Self; 7] = [
        Self::Twitter,
        Self::Tumblr,
        Self::TumblrTag,
        Self::Flickr,
        Self::FlickrGroup,
        Self::Instagram,
        Self::Feed,
    ];

    /// Stable name used on the command line and in snapshot kinds.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Tumblr => "tumblr",
            Self::TumblrTag => "tumblr-tag",
            Self::Flickr => "flickr",
            Self::FlickrGroup => "flickr-group",
            Self::Instagram => "instagram",
            Self::Feed => "feed",
        }
    }

    /// Credential service, or `None` for anonymous sources.
    #[must_use]
    pub fn service(self) -> Option<Service> {
        match self {
            Self::Twitter => Some(Service::Twitter),
            Self::Tumblr | Self::TumblrTag => Some(Service::Tumblr),
            Self::Flickr | Self::FlickrGroup => Some(Service::Flickr),
            Self::Instagram => Some(Service::Instagram),
            Self::Feed => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown platform '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// API base URL overrides, for mirrors and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseUrls {
    /// Twitter API
    pub twitter: Option<String>,
    /// Tumblr API
    pub tumblr: Option<String>,
    /// Flickr API
    pub flickr: Option<String>,
    /// Instagram API
    pub instagram: Option<String>,
}

/// Everything a [`Runner`] needs besides credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Root directory for snapshots and media
    pub content_dir: PathBuf,
    /// Retry tuning
    pub retry: RetrySettings,
    /// Client timeouts
    pub http: HttpSettings,
    /// Date window
    pub window: Window,
    /// Item cap across terms
    pub max_length: Option<usize>,
    /// Download media after acquisition
    pub download_media: bool,
    /// Base URL overrides
    pub base_urls: BaseUrls,
}

impl RunnerSettings {
    /// Settings with defaults for everything but the content directory.
    #[must_use]
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            retry: RetrySettings::default(),
            http: HttpSettings::default(),
            window: Window::default(),
            max_length: None,
            download_media: true,
            base_urls: BaseUrls::default(),
        }
    }
}

/// One source to collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectJob {
    /// Platform to collect from
    pub platform: Platform,
    /// Query string, feed URL, or group name
    pub query: String,
    /// Flickr group id, when the query is the group's name
    pub group_id: Option<String>,
}

impl CollectJob {
    /// A job without a group id.
    #[must_use]
    pub fn new(platform: Platform, query: impl Into<String>) -> Self {
        Self {
            platform,
            query: query.into(),
            group_id: None,
        }
    }

    /// Sets the Flickr group id.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Parses the query the way its platform reads it.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for an unparseable query.
    pub fn descriptor(&self) -> Result<SourceDescriptor, QueryError> {
        match self.platform {
            Platform::TumblrTag | Platform::Instagram => {
                parse_with_default(&self.query, TermType::Hashtag)
            }
            Platform::Feed => SourceDescriptor::for_feed_url(&self.query),
            Platform::FlickrGroup if self.group_id.is_none() => {
                SourceDescriptor::for_group(&self.query)
            }
            _ => parse(&self.query),
        }
    }
}

/// What a finished collection produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    /// Platform collected from
    pub platform: Platform,
    /// Source log label
    pub source: String,
    /// Items in the snapshot
    pub items: usize,
    /// Whether the snapshot is complete
    pub complete: bool,
    /// Snapshot file
    pub snapshot: PathBuf,
    /// Media stored locally
    pub media_downloaded: usize,
    /// Media that failed to download
    pub media_failed: usize,
}

/// Why a job could not produce a snapshot.
#[derive(Debug, Error)]
pub enum RunError {
    /// The HTTP client could not be built
    #[error(transparent)]
    Client(#[from] ClientBuildError),

    /// Acquisition failed
    #[error(transparent)]
    Acquire(#[from] AcquireError),
}

impl RunError {
    /// Whether the job should be retried later by an external scheduler.
    #[must_use]
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::Acquire(e) if e.is_retry_later())
    }
}

impl From<QueryError> for RunError {
    fn from(error: QueryError) -> Self {
        Self::Acquire(AcquireError::InvalidQuery(error))
    }
}

/// Runs collection jobs.
#[async_trait(?Send)]
pub trait JobRunner {
    /// Collects one job.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when no usable snapshot was produced.
    async fn run_job(&self, job: &CollectJob, purge: bool) -> Result<CollectReport, RunError>;
}

/// Builds collectors from settings and credentials.
#[derive(Debug, Clone)]
pub struct Runner {
    settings: RunnerSettings,
    credentials: Credentials,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub fn new(settings: RunnerSettings, credentials: Credentials) -> Self {
        Self {
            settings,
            credentials,
            sleeper: None,
        }
    }

    /// Replaces the backoff sleeper of every retry policy.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Runner settings.
    #[must_use]
    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    fn store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.settings.content_dir)
    }

    fn collector<P: Paginator>(
        &self,
        platform: Platform,
        paginator: P,
        descriptor: SourceDescriptor,
    ) -> Result<ContentCollector<P>, RunError> {
        let mut policy = self.settings.retry.policy();
        if let Some(sleeper) = &self.sleeper {
            policy = policy.with_sleeper(Arc::clone(sleeper));
        }
        let credentials = platform
            .service()
            .map(|service| self.credentials.pool(service))
            .unwrap_or_default();

        let mut collector = ContentCollector::new(paginator, descriptor, self.store())
            .credentials(credentials)
            .retry(self.settings.retry)
            .retry_policy(policy.clone())
            .window(self.settings.window)
            .max_length(self.settings.max_length);
        if self.settings.download_media {
            let client = build_http_client("media", self.settings.http)?;
            collector = collector.media(MediaDownloader::new(client, policy));
        }
        Ok(collector)
    }

    async fn collect_with<P: Paginator>(
        &self,
        platform: Platform,
        collector: ContentCollector<P>,
        purge: bool,
    ) -> Result<CollectReport, RunError> {
        let state = collector.collect(purge).await?;
        let report = report_for(platform, &collector, &state);
        info!(
            platform = %platform,
            source = %report.source,
            items = report.items,
            media_downloaded = report.media_downloaded,
            media_failed = report.media_failed,
            snapshot = %report.snapshot.display(),
            "collection finished"
        );
        Ok(report)
    }

    /// Collects one job.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for query, client, acquisition or snapshot
    /// failures.
    #[instrument(skip(self), fields(platform = %job.platform, query = %job.query))]
    pub async fn collect(&self, job: &CollectJob, purge: bool) -> Result<CollectReport, RunError> {
        let descriptor = job.descriptor()?;
        let http = self.settings.http;
        let urls = &self.settings.base_urls;
        let platform = job.platform;

        match platform {
            Platform::Twitter => {
                let paginator = match &urls.twitter {
                    Some(url) => TwitterPaginator::with_base_url(url, http)?,
                    None => TwitterPaginator::new(http)?,
                };
                let collector = self.collector(platform, paginator, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
            Platform::Tumblr => {
                let paginator = match &urls.tumblr {
                    Some(url) => TumblrBlogPaginator::with_base_url(url, http)?,
                    None => TumblrBlogPaginator::new(http)?,
                };
                let collector = self.collector(platform, paginator, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
            Platform::TumblrTag => {
                let paginator = match &urls.tumblr {
                    Some(url) => TumblrTagPaginator::with_base_url(url, http)?,
                    None => TumblrTagPaginator::new(http)?,
                };
                let collector = self.collector(platform, paginator, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
            Platform::Flickr => {
                let paginator = match &urls.flickr {
                    Some(url) => FlickrPhotosetPaginator::with_base_url(url, http)?,
                    None => FlickrPhotosetPaginator::new(http)?,
                };
                let collector = self.collector(platform, paginator, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
            Platform::FlickrGroup => {
                let mut paginator = match &urls.flickr {
                    Some(url) => FlickrGroupPaginator::with_base_url(url, http)?,
                    None => FlickrGroupPaginator::new(http)?,
                };
                if let Some(group_id) = &job.group_id {
                    paginator = paginator.group_id(group_id.clone());
                }
                let mut collector = self.collector(platform, paginator, descriptor)?;
                if let Some(group_id) = &job.group_id {
                    collector = collector.snapshot_stem(sanitize_segment(group_id));
                }
                self.collect_with(platform, collector, purge).await
            }
            Platform::Instagram => {
                let paginator = match &urls.instagram {
                    Some(url) => InstagramPaginator::with_base_url(url, http)?,
                    None => InstagramPaginator::new(http)?,
                };
                let collector = self.collector(platform, paginator, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
            Platform::Feed => {
                let collector = self.collector(platform, FeedPaginator::new(http)?, descriptor)?;
                self.collect_with(platform, collector, purge).await
            }
        }
    }

    /// Deletes the snapshot a job would write. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for an unparseable query or an I/O failure.
    pub async fn purge(&self, job: &CollectJob) -> Result<bool, RunError> {
        let descriptor = job.descriptor()?;
        let mut id = SnapshotId::new(descriptor.path_segment, job.platform.as_str());
        if job.platform == Platform::FlickrGroup
            && let Some(group_id) = &job.group_id
        {
            id = id.with_stem(sanitize_segment(group_id));
        }
        let removed = self
            .store()
            .purge(&id)
            .await
            .map_err(AcquireError::from)?;
        Ok(removed)
    }
}

#[async_trait(?Send)]
impl JobRunner for Runner {
    async fn run_job(&self, job: &CollectJob, purge: bool) -> Result<CollectReport, RunError> {
        self.collect(job, purge).await
    }
}

fn report_for<P: Paginator>(
    platform: Platform,
    collector: &ContentCollector<P>,
    state: &StateOf<P>,
) -> CollectReport {
    let media = state.items.iter().flat_map(|item| item.media().iter());
    let (mut downloaded, mut failed) = (0, 0);
    for reference in media {
        match reference.state {
            MediaState::Downloaded { .. } => downloaded += 1,
            MediaState::Failed { .. } => failed += 1,
            MediaState::Pending => {}
        }
    }
    CollectReport {
        platform,
        source: collector.descriptor().log_label.clone(),
        items: state.items.len(),
        complete: state.content_complete,
        snapshot: collector.snapshot_path(),
        media_downloaded: downloaded,
        media_failed: failed,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_round_trip_through_from_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("myspace".parse::<Platform>().unwrap_err().contains("tumblr-tag"));
    }

    #[test]
    fn test_platform_kind_matches_paginator_kind() {
        let http = HttpSettings::default();
        assert_eq!(TwitterPaginator::new(http).unwrap().kind(), Platform::Twitter.as_str());
        assert_eq!(
            TumblrTagPaginator::new(http).unwrap().kind(),
            Platform::TumblrTag.as_str()
        );
        assert_eq!(
            FlickrGroupPaginator::new(http).unwrap().kind(),
            Platform::FlickrGroup.as_str()
        );
        assert_eq!(FeedPaginator::new(http).unwrap().kind(), Platform::Feed.as_str());
    }

    #[test]
    fn test_descriptor_defaults_per_platform() {
        let tag = CollectJob::new(Platform::TumblrTag, "sunset").descriptor().unwrap();
        assert_eq!(tag.path_segment, "for_sunset");

        let user = CollectJob::new(Platform::Twitter, "alice").descriptor().unwrap();
        assert_eq!(user.path_segment, "by_alice");

        let feed = CollectJob::new(Platform::Feed, "https://blog.example.com/rss")
            .descriptor()
            .unwrap();
        assert_eq!(feed.path_segment, "blog.example.com");

        let group = CollectJob::new(Platform::FlickrGroup, "@harbours")
            .group_id("123@N01")
            .descriptor()
            .unwrap();
        assert_eq!(group.path_segment, "by_harbours");
    }

    #[test]
    fn test_service_mapping() {
        assert_eq!(Platform::TumblrTag.service(), Some(Service::Tumblr));
        assert_eq!(Platform::Feed.service(), None);
    }

    #[tokio::test]
    async fn test_purge_missing_snapshot_is_false() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = Runner::new(RunnerSettings::new(dir.path()), Credentials::default());
        let removed = runner
            .purge(&CollectJob::new(Platform::Twitter, "@alice"))
            .await
            .unwrap();
        assert!(!removed);
    }
}
