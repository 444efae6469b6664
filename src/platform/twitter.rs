//! Twitter user timelines and hashtag search, paged by tweet id bounds.
//!
//! The API returns newest tweets first. Paging backward asks for tweets
//! with ids up to `max_id - 1` (the bound is inclusive, so the boundary
//! tweet is not fetched twice). Paging forward asks for ids above
//! `since_id` (exclusive). A single request never carries both bounds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http_client::{ClientBuildError, HttpSettings, build_http_client, get_json};
use super::{Page, Paginator, ProbeOutcome, Record};
use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::MediaReference;
use crate::query::{Term, TermType};

/// Default Twitter API base URL.
const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

/// Tweets requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Account whose timeline is fetched to tell "nothing found" from "service down".
pub const DEFAULT_PROBE_ACCOUNT: &str = "BluePeninsula";

/// Timestamp layout of v1.1 `created_at` fields.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Timestamp layout of legacy search results.
const LEGACY_SEARCH_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

// ==================== Cursor ====================

/// Direction of travel through a timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagingMode {
    /// Backward in time from the newest tweet (default)
    #[default]
    MaxId,
    /// Forward in time from the newest tweet already held
    SinceId,
}

/// Id bounds seen so far for one term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwitterCursor {
    /// Smallest tweet id seen
    pub max_id: Option<u64>,
    /// Largest tweet id seen
    pub since_id: Option<u64>,
}

impl TwitterCursor {
    fn absorb(&mut self, id: u64) {
        self.max_id = Some(self.max_id.map_or(id, |m| m.min(id)));
        self.since_id = Some(self.since_id.map_or(id, |s| s.max(id)));
    }
}

/// Bounds sent with one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestBounds {
    /// Inclusive upper id bound
    pub max_id: Option<u64>,
    /// Exclusive lower id bound
    pub since_id: Option<u64>,
}

impl RequestBounds {
    /// Derives the bounds for the next request from a cursor.
    #[must_use]
    pub fn for_cursor(mode: PagingMode, cursor: &TwitterCursor) -> Self {
        match mode {
            PagingMode::MaxId => Self {
                max_id: cursor.max_id.and_then(|id| id.checked_sub(1)).filter(|id| *id > 0),
                since_id: None,
            },
            PagingMode::SinceId => Self {
                max_id: None,
                since_id: cursor.since_id,
            },
        }
    }

    /// Rejects requests carrying both bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] when both bounds are set.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.max_id.is_some() && self.since_id.is_some() {
            return Err(ApiError::invalid_request(
                "a request should not use both max_id and since_id",
            ));
        }
        Ok(())
    }

    fn push_query(&self, query: &mut Vec<(&'static str, String)>) {
        if let Some(max_id) = self.max_id {
            query.push(("max_id", max_id.to_string()));
        }
        if let Some(since_id) = self.since_id {
            query.push(("since_id", since_id.to_string()));
        }
    }
}

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct RawTweet {
    id: u64,
    created_at: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    entities: Option<RawEntities>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    screen_name: String,
    #[serde(default)]
    statuses_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEntities {
    #[serde(default)]
    media: Vec<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(default)]
    media_url_https: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    statuses: Vec<RawTweet>,
}

// ==================== Record ====================

/// A normalized tweet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    /// Tweet id as a string
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Tweet text
    pub text: String,
    /// Author screen name
    pub screen_name: Option<String>,
    /// Attached photos
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Record for Tweet {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn media(&self) -> &[MediaReference] {
        &self.media
    }

    fn media_mut(&mut self) -> &mut [MediaReference] {
        &mut self.media
    }
}

/// Parses a Twitter `created_at` in either known layout.
#[must_use]
pub fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, CREATED_AT_FORMAT)
        .or_else(|_| DateTime::parse_from_str(value, LEGACY_SEARCH_FORMAT))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn normalize(raw: RawTweet) -> Option<Tweet> {
    let Some(created_at) = parse_created_at(&raw.created_at) else {
        debug!(id = raw.id, created_at = %raw.created_at, "dropping tweet with unparseable date");
        return None;
    };
    let media = raw
        .entities
        .unwrap_or_default()
        .media
        .into_iter()
        .filter_map(|m| m.media_url_https.or(m.media_url))
        .map(MediaReference::new)
        .collect();
    Some(Tweet {
        id: raw.id.to_string(),
        created_at,
        text: raw.full_text.or(raw.text).unwrap_or_default(),
        screen_name: raw.user.map(|u| u.screen_name),
        media,
    })
}

// ==================== TwitterPaginator ====================

/// Pages through user timelines (`@name`) and hashtag search (`#tag`).
///
/// Requests authenticate with the drawn bundle's `token` as a bearer token.
pub struct TwitterPaginator {
    client: Client,
    base_url: String,
    mode: PagingMode,
    page_size: u32,
    probe_account: String,
}

impl TwitterPaginator {
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
            client: build_http_client("twitter", settings)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode: PagingMode::default(),
            page_size: DEFAULT_PAGE_SIZE,
            probe_account: DEFAULT_PROBE_ACCOUNT.to_string(),
        })
    }

    /// Sets the paging direction.
    #[must_use]
    pub fn mode(mut self, mode: PagingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the tweets requested per page.
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the account used by the health probe.
    #[must_use]
    pub fn probe_account(mut self, account: impl Into<String>) -> Self {
        self.probe_account = account.into();
        self
    }

    /// Fetches one page with explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] without any network call when
    /// both bounds are set; otherwise any classified API failure.
    pub async fn fetch_with_bounds(
        &self,
        term: &Term,
        bounds: RequestBounds,
        credential: Option<&CredentialBundle>,
    ) -> Result<(Vec<Tweet>, Option<u64>), ApiError> {
        bounds.validate()?;

        let mut query: Vec<(&'static str, String)> = vec![("count", self.page_size.to_string())];
        bounds.push_query(&mut query);
        let bearer = credential.map(|c| c.token.as_str()).filter(|t| !t.is_empty());

        let raw = match term.kind {
            TermType::User => {
                query.push(("screen_name", term.word.clone()));
                query.push(("include_rts", "true".to_string()));
                query.push(("tweet_mode", "extended".to_string()));
                let url = format!("{}/1.1/statuses/user_timeline.json", self.base_url);
                get_json::<Vec<RawTweet>>(&self.client, "twitter/user_timeline", &url, &query, bearer)
                    .await?
            }
            TermType::Hashtag => {
                query.push(("q", term.display()));
                query.push(("tweet_mode", "extended".to_string()));
                let url = format!("{}/1.1/search/tweets.json", self.base_url);
                get_json::<SearchResponse>(&self.client, "twitter/search", &url, &query, bearer)
                    .await?
                    .statuses
            }
        };

        let statuses_count = raw
            .iter()
            .find_map(|t| t.user.as_ref().and_then(|u| u.statuses_count));
        let tweets = raw.into_iter().filter_map(normalize).collect();
        Ok((tweets, statuses_count))
    }
}

impl std::fmt::Debug for TwitterPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitterPaginator")
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for TwitterPaginator {
    type Item = Tweet;
    type Cursor = TwitterCursor;

    fn kind(&self) -> &'static str {
        "twitter"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Twitter)
    }

    fn platform_start(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(2006, 7, 13, 0, 0, 0).single()
    }

    #[tracing::instrument(skip(self, term, cursor, credential), fields(platform = "twitter", term = %term.display()))]
    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &TwitterCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<Tweet, TwitterCursor>, ApiError> {
        let bounds = RequestBounds::for_cursor(self.mode, cursor);
        let (tweets, statuses_count) = self.fetch_with_bounds(term, bounds, credential).await?;

        let mut next = *cursor;
        for tweet in &tweets {
            if let Ok(id) = tweet.id.parse::<u64>() {
                next.absorb(id);
            }
        }
        debug!(
            count = tweets.len(),
            max_id = ?bounds.max_id,
            since_id = ?bounds.since_id,
            "got tweet page"
        );

        let page = if tweets.is_empty() {
            Page::last(tweets, next)
        } else {
            Page::more(tweets, next)
        };
        Ok(page.with_expected_total(statuses_count))
    }

    async fn probe(&self, credential: Option<&CredentialBundle>) -> ProbeOutcome {
        let term = Term {
            kind: TermType::User,
            word: self.probe_account.clone(),
        };
        match self
            .fetch_with_bounds(&term, RequestBounds::default(), credential)
            .await
        {
            Ok(_) => ProbeOutcome::Healthy,
            Err(e) => ProbeOutcome::Unhealthy(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Bounds Tests ====================

    #[test]
    fn test_bounds_first_page_has_no_bounds() {
        let bounds = RequestBounds::for_cursor(PagingMode::MaxId, &TwitterCursor::default());
        assert_eq!(bounds, RequestBounds::default());
    }

    #[test]
    fn test_bounds_max_id_is_decremented() {
        let cursor = TwitterCursor {
            max_id: Some(500),
            since_id: Some(900),
        };
        let bounds = RequestBounds::for_cursor(PagingMode::MaxId, &cursor);
        assert_eq!(bounds.max_id, Some(499));
        assert_eq!(bounds.since_id, None);
    }

    #[test]
    fn test_bounds_since_id_is_unchanged() {
        let cursor = TwitterCursor {
            max_id: Some(500),
            since_id: Some(900),
        };
        let bounds = RequestBounds::for_cursor(PagingMode::SinceId, &cursor);
        assert_eq!(bounds.since_id, Some(900));
        assert_eq!(bounds.max_id, None);
    }

    #[test]
    fn test_bounds_both_set_is_invalid_request() {
        let bounds = RequestBounds {
            max_id: Some(1),
            since_id: Some(2),
        };
        assert!(matches!(
            bounds.validate().unwrap_err(),
            ApiError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn test_cursor_absorb_tracks_extremes() {
        let mut cursor = TwitterCursor::default();
        for id in [50, 10, 70] {
            cursor.absorb(id);
        }
        assert_eq!(cursor.max_id, Some(10));
        assert_eq!(cursor.since_id, Some(70));
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_parse_created_at_both_layouts() {
        let a = parse_created_at("Wed Oct 10 20:19:24 +0000 2018").unwrap();
        let b = parse_created_at("Wed, 10 Oct 2018 20:19:24 +0000").unwrap();
        assert_eq!(a, b);
        assert!(parse_created_at("10/10/2018").is_none());
    }

    #[test]
    fn test_normalize_prefers_full_text_and_collects_media() {
        let raw: RawTweet = serde_json::from_str(
            r#"{
                "id": 42,
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "text": "short",
                "full_text": "the full text",
                "user": {"screen_name": "alice", "statuses_count": 12},
                "entities": {"media": [{"media_url_https": "https://pbs.twimg.com/media/a.jpg"}]}
            }"#,
        )
        .unwrap();
        let tweet = normalize(raw).unwrap();
        assert_eq!(tweet.id, "42");
        assert_eq!(tweet.text, "the full text");
        assert_eq!(tweet.screen_name.as_deref(), Some("alice"));
        assert_eq!(tweet.media.len(), 1);
    }

    #[test]
    fn test_normalize_drops_unparseable_date() {
        let raw: RawTweet =
            serde_json::from_str(r#"{"id": 1, "created_at": "garbage", "text": "x"}"#).unwrap();
        assert!(normalize(raw).is_none());
    }

    #[test]
    fn test_platform_start_date() {
        let paginator = TwitterPaginator::new(HttpSettings::default()).unwrap();
        let start = paginator.platform_start().unwrap();
        assert_eq!(start.to_rfc3339(), "2006-07-13T00:00:00+00:00");
    }
}
