//! Per-platform pagination adapters.
//!
//! Each platform implements [`Paginator`]: given one query term and its
//! cursor, fetch one page of normalized records and the next cursor. The
//! acquisition state machine drives every platform through this one trait,
//! so retry, dedup, date filtering and checkpointing are written once.
//!
//! # Platforms
//!
//! | Paginator | Cursor shape |
//! |---|---|
//! | [`TwitterPaginator`] | `max_id` / `since_id` bounds |
//! | [`TumblrBlogPaginator`] | offset against a known total |
//! | [`TumblrTagPaginator`] | `before` timestamp with stagnation detection |
//! | [`InstagramPaginator`] | `before` timestamp with stagnation detection |
//! | [`FlickrPhotosetPaginator`] | photoset list, then page per photoset |
//! | [`FlickrGroupPaginator`] | page number |
//! | [`FeedPaginator`] | single page |

pub mod feed;
pub mod flickr;
mod html;
pub mod http_client;
pub mod instagram;
mod tag_feed;
pub mod tumblr;
pub mod twitter;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::MediaReference;
use crate::query::{Term, TermType};

pub use feed::{FeedCursor, FeedEntry, FeedPaginator, parse_feed};
pub use flickr::{
    FlickrGroupPaginator, FlickrPhoto, FlickrPhotosetPaginator, GroupCursor, PhotosetCursor,
};
pub use http_client::{ClientBuildError, HttpSettings, build_http_client};
pub use instagram::{InstagramMedia, InstagramPaginator};
pub use tag_feed::TagFeedCursor;
pub use tumblr::{BlogCursor, PostKind, TumblrBlogPaginator, TumblrPost, TumblrTagPaginator};
pub use twitter::{PagingMode, RequestBounds, Tweet, TwitterCursor, TwitterPaginator};

/// A normalized record from any platform.
pub trait Record: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned {
    /// Platform-unique identity, used for deduplication.
    fn id(&self) -> &str;

    /// Creation time.
    fn timestamp(&self) -> DateTime<Utc>;

    /// Free text used for word frequencies.
    fn text(&self) -> &str;

    /// Media assets referenced by the record.
    fn media(&self) -> &[MediaReference];

    /// Mutable access to media assets, for the downloader.
    fn media_mut(&mut self) -> &mut [MediaReference];
}

/// One page returned by a [`Paginator`].
#[derive(Debug, Clone)]
pub struct Page<I, C> {
    /// Records, newest first as the API returned them
    pub items: Vec<I>,
    /// Cursor for the next request on the same term
    pub next_cursor: C,
    /// No further pages exist for this term
    pub exhausted: bool,
    /// Total the platform claims exists for this term, when it says
    pub expected_total: Option<u64>,
}

impl<I, C> Page<I, C> {
    /// A page after which no more pages exist.
    #[must_use]
    pub fn last(items: Vec<I>, next_cursor: C) -> Self {
        Self {
            items,
            next_cursor,
            exhausted: true,
            expected_total: None,
        }
    }

    /// A page with more to follow.
    #[must_use]
    pub fn more(items: Vec<I>, next_cursor: C) -> Self {
        Self {
            items,
            next_cursor,
            exhausted: false,
            expected_total: None,
        }
    }

    /// Attaches the platform's claimed total.
    #[must_use]
    pub fn with_expected_total(mut self, total: Option<u64>) -> Self {
        self.expected_total = total;
        self
    }
}

/// Result of a platform health probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The platform has no probe.
    Unsupported,
    /// A known-good request succeeded.
    Healthy,
    /// A known-good request failed.
    Unhealthy(ApiError),
}

/// Platform-specific page fetching.
#[async_trait]
pub trait Paginator: Send + Sync {
    /// Normalized record type.
    type Item: Record;

    /// Per-term pagination position, persisted inside snapshots.
    type Cursor: Clone
        + Default
        + fmt::Debug
        + PartialEq
        + Send
        + Sync
        + Serialize
        + DeserializeOwned;

    /// Short name used as the snapshot kind suffix and in logs.
    fn kind(&self) -> &'static str;

    /// Credential service, or `None` for anonymous platforms.
    fn service(&self) -> Option<Service>;

    /// Earliest valid creation time on this platform.
    fn platform_start(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether successive pages of a term only ever get older. When they
    /// do, the first item before the window start ends the term.
    fn newest_first(&self) -> bool {
        true
    }

    /// Fetches one page for `term` at `cursor`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] classified for the retry policy.
    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &Self::Cursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<Self::Item, Self::Cursor>, ApiError>;

    /// Checks whether the platform answers a request known to succeed.
    async fn probe(&self, _credential: Option<&CredentialBundle>) -> ProbeOutcome {
        ProbeOutcome::Unsupported
    }
}

/// Rejects a term this platform cannot address, before any request is made.
pub(crate) fn require_term_kind(
    platform: &str,
    term: &Term,
    kind: TermType,
) -> Result<(), ApiError> {
    if term.kind == kind {
        return Ok(());
    }
    let wanted = match kind {
        TermType::User => "user names",
        TermType::Hashtag => "hashtags",
    };
    Err(ApiError::invalid_request(format!(
        "{platform} supports {wanted} only, got {}",
        term.display()
    )))
}

/// Parses an RFC 3339 timestamp.
pub(crate) fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Converts unix seconds to a UTC timestamp.
pub(crate) fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}
