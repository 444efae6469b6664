//! Instagram recent media by hashtag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http_client::{ClientBuildError, HttpSettings, build_http_client, get_json};
use super::tag_feed::TagFeedCursor;
use super::{Page, Paginator, Record, from_unix, require_term_kind};
use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::MediaReference;
use crate::query::{Term, TermType};

/// Default Instagram API base URL.
const DEFAULT_BASE_URL: &str = "https://api.instagram.com";

/// Media requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 33;

/// Stop a hashtag feed after this many distinct accounts.
pub const DEFAULT_MAX_HOSTS: usize = 100;

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct RecentResponse {
    #[serde(default)]
    data: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    id: String,
    created_time: String,
    user: RawUser,
    #[serde(default)]
    caption: Option<RawCaption>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    images: Option<RawImages>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct RawCaption {
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawImages {
    standard_resolution: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    url: String,
}

// ==================== Record ====================

/// A normalized Instagram post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstagramMedia {
    /// Media id
    pub id: String,
    /// Posting account
    pub username: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Caption text
    pub caption: String,
    /// Hashtags on the post
    #[serde(default)]
    pub tags: Vec<String>,
    /// Permalink
    pub link: Option<String>,
    /// Standard-resolution image
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Record for InstagramMedia {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn text(&self) -> &str {
        &self.caption
    }

    fn media(&self) -> &[MediaReference] {
        &self.media
    }

    fn media_mut(&mut self) -> &mut [MediaReference] {
        &mut self.media
    }
}

fn normalize(raw: RawMedia) -> Option<InstagramMedia> {
    let created_at = raw.created_time.trim().parse::<i64>().ok().and_then(from_unix);
    let Some(created_at) = created_at else {
        debug!(id = %raw.id, created_time = %raw.created_time, "dropping media with bad time");
        return None;
    };
    let media = raw
        .images
        .and_then(|images| images.standard_resolution)
        .map(|image| MediaReference::new(image.url))
        .into_iter()
        .collect();

    Some(InstagramMedia {
        id: raw.id,
        username: raw.user.username,
        created_at,
        caption: raw.caption.map(|c| c.text).unwrap_or_default(),
        tags: raw.tags,
        link: raw.link,
        media,
    })
}

// ==================== InstagramPaginator ====================

/// Pages backward through recent media tagged with a word.
///
/// Only hashtag terms are supported; the API offers no public user feed.
pub struct InstagramPaginator {
    client: Client,
    base_url: String,
    page_size: u32,
    max_hosts: usize,
}

impl InstagramPaginator {
    /// Creates a paginator against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if HTTP client construction fails.
    pub fn new(settings: HttpSettings) -> Result<Self, ClientBuildError> {
        Self::with_base_url(DEFAULT_BASE_URL, settings)
    }

    /// Creates a paginator with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if HTTP client construction fails.
    pub fn with_base_url(
        base_url: impl Into<String>,
        settings: HttpSettings,
    ) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_http_client("instagram", settings)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_hosts: DEFAULT_MAX_HOSTS,
        })
    }

    /// Sets media per page.
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the distinct-account cap.
    #[must_use]
    pub fn max_hosts(mut self, max_hosts: usize) -> Self {
        self.max_hosts = max_hosts.max(1);
        self
    }
}

impl std::fmt::Debug for InstagramPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstagramPaginator")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .field("max_hosts", &self.max_hosts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for InstagramPaginator {
    type Item = InstagramMedia;
    type Cursor = TagFeedCursor;

    fn kind(&self) -> &'static str {
        "instagram"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Instagram)
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &TagFeedCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<InstagramMedia, TagFeedCursor>, ApiError> {
        require_term_kind("instagram", term, TermType::Hashtag)?;

        let url = format!("{}/v1/tags/{}/media/recent", self.base_url, term.word);
        let mut query = vec![
            (
                "client_id",
                credential.map(|c| c.key.clone()).unwrap_or_default(),
            ),
            ("count", self.page_size.to_string()),
        ];
        if let Some(before) = cursor.before {
            query.push(("max_timestamp", before.to_string()));
        }

        let response: RecentResponse =
            get_json(&self.client, "instagram/tag_recent", &url, &query, None).await?;
        let items: Vec<InstagramMedia> = response.data.into_iter().filter_map(normalize).collect();

        let (next, stagnated) = cursor.advance(
            items
                .iter()
                .map(|m| (m.created_at, m.username.as_str())),
        );
        debug!(
            tag = %term.word,
            count = items.len(),
            accounts = next.seen_hosts.len(),
            "got tag media page"
        );

        let exhausted = stagnated || next.seen_hosts.len() >= self.max_hosts;
        Ok(if exhausted {
            Page::last(items, next)
        } else {
            Page::more(items, next)
        })
    }
}
