//! RSS and Atom feeds, fetched as a single page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::html::image_sources;
use super::http_client::{ClientBuildError, HttpSettings, build_http_client, get_text};
use super::{Page, Paginator, Record};
use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::MediaReference;
use crate::query::Term;

/// A normalized feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Entry id (guid or Atom id)
    pub id: String,
    /// Entry title
    pub title: String,
    /// First link, when present
    pub link: Option<String>,
    /// Published time, falling back to the updated time
    pub published: DateTime<Utc>,
    /// Content or summary HTML
    pub content: String,
    /// Images found in the content
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Record for FeedEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.published
    }

    fn text(&self) -> &str {
        &self.title
    }

    fn media(&self) -> &[MediaReference] {
        &self.media
    }

    fn media_mut(&mut self) -> &mut [MediaReference] {
        &mut self.media
    }
}

/// Done once the document has been read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    /// The feed document was fetched
    pub fetched: bool,
}

/// Parses a feed document into entries, dropping undated ones.
///
/// # Errors
///
/// Returns [`ApiError::Malformed`] when the document is not RSS or Atom.
pub fn parse_feed(endpoint: &str, body: &[u8]) -> Result<Vec<FeedEntry>, ApiError> {
    let feed =
        feed_rs::parser::parse(body).map_err(|e| ApiError::malformed(endpoint, e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let Some(published) = entry.published.or(entry.updated) else {
                debug!(id = %entry.id, "dropping undated feed entry");
                return None;
            };
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();
            let mut images = image_sources(&content);
            for object in &entry.media {
                for item in &object.content {
                    if let Some(url) = &item.url
                        && !images.iter().any(|known| known == url.as_str())
                    {
                        images.push(url.to_string());
                    }
                }
            }
            Some(FeedEntry {
                id: entry.id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link: entry.links.first().map(|l| l.href.clone()),
                published: published.with_timezone(&Utc),
                content,
                media: images.into_iter().map(MediaReference::new).collect(),
            })
        })
        .collect();
    Ok(entries)
}

/// Reads a whole feed in one request. The query term is the feed URL.
pub struct FeedPaginator {
    client: Client,
}

impl FeedPaginator {
    /// Creates a feed paginator.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if HTTP client construction fails.
    pub fn new(settings: HttpSettings) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_http_client("feed", settings)?,
        })
    }
}

impl std::fmt::Debug for FeedPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPaginator").finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for FeedPaginator {
    type Item = FeedEntry;
    type Cursor = FeedCursor;

    fn kind(&self) -> &'static str {
        "feed"
    }

    fn service(&self) -> Option<Service> {
        None
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &FeedCursor,
        _credential: Option<&CredentialBundle>,
    ) -> Result<Page<FeedEntry, FeedCursor>, ApiError> {
        let done = FeedCursor { fetched: true };
        if cursor.fetched {
            return Ok(Page::last(Vec::new(), done));
        }
        let body = get_text(&self.client, "feed", &term.word, &[], None).await?;
        let entries = parse_feed("feed", body.as_bytes())?;
        debug!(url = %term.word, count = entries.len(), "parsed feed");
        Ok(Page::last(entries, done))
    }
}
