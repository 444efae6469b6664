//! Tumblr blogs (offset paging) and tag search (time-cursor paging).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::html::image_sources;
use super::http_client::{ClientBuildError, HttpSettings, build_http_client, get_json};
use super::tag_feed::TagFeedCursor;
use super::{Page, Paginator, Record, from_unix, require_term_kind};
use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::{MediaReference, destination_name, hashed_name};
use crate::query::{Term, TermType};

/// Default Tumblr API base URL.
const DEFAULT_BASE_URL: &str = "https://api.tumblr.com";

/// Posts requested per page (the API maximum).
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Stop a tag search after this many distinct blogs.
pub const DEFAULT_MAX_HOSTS: usize = 100;

/// Preferred photo size marker in alternate-size URLs.
const PREFERRED_SIZE: &str = "_500";

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    blog: RawBlog,
}

#[derive(Debug, Deserialize)]
struct RawBlog {
    posts: u64,
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<RawPost>,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: u64,
    blog_name: String,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    photos: Vec<RawPhoto>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    #[serde(default)]
    alt_sizes: Vec<RawSize>,
    #[serde(default)]
    original_size: Option<RawSize>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    url: String,
}

// ==================== Record ====================

/// Tumblr post type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    /// Text post
    Text,
    /// Photo post, including text posts converted for their images
    Photo,
    /// Anything else (quote, link, chat, audio, video, answer)
    Other,
}

/// A normalized Tumblr post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TumblrPost {
    /// Post id
    pub id: String,
    /// Blog the post belongs to
    pub blog_name: String,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    /// Post type after conversion
    pub kind: PostKind,
    /// Whether a text post was converted to a photo post
    #[serde(default)]
    pub converted: bool,
    /// Title, when the post has one
    pub title: Option<String>,
    /// Body or caption HTML
    pub text: String,
    /// Post tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Photos
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Record for TumblrPost {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
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

fn preferred_photo_url(photo: &RawPhoto) -> Option<String> {
    photo
        .alt_sizes
        .iter()
        .find(|size| size.url.contains(PREFERRED_SIZE))
        .or_else(|| photo.alt_sizes.first())
        .or(photo.original_size.as_ref())
        .map(|size| size.url.clone())
}

/// Images lifted out of a converted text post get hashed names so they
/// cannot collide with photo-post files.
fn converted_reference(url: String) -> MediaReference {
    let extension = destination_name(&url)
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| format!(".{ext}")));
    match extension {
        Some(ext) => {
            let name = hashed_name(&url, &ext);
            MediaReference::named(url, name)
        }
        None => MediaReference::new(url),
    }
}

fn normalize(raw: RawPost) -> Option<TumblrPost> {
    let Some(timestamp) = from_unix(raw.timestamp) else {
        debug!(id = raw.id, "dropping post with invalid timestamp");
        return None;
    };

    let (kind, converted, text, media) = match raw.kind.as_str() {
        "photo" => {
            let media = raw
                .photos
                .iter()
                .filter_map(preferred_photo_url)
                .map(MediaReference::new)
                .collect();
            (PostKind::Photo, false, raw.caption.unwrap_or_default(), media)
        }
        "text" => {
            let body = raw.body.unwrap_or_default();
            let images = image_sources(&body);
            if images.is_empty() {
                (PostKind::Text, false, body, Vec::new())
            } else {
                let media = images.into_iter().map(converted_reference).collect();
                (PostKind::Photo, true, body, media)
            }
        }
        _ => (
            PostKind::Other,
            false,
            raw.body.or(raw.caption).unwrap_or_default(),
            Vec::new(),
        ),
    };

    Some(TumblrPost {
        id: raw.id.to_string(),
        blog_name: raw.blog_name,
        timestamp,
        kind,
        converted,
        title: raw.title,
        text,
        tags: raw.tags,
        media,
    })
}

fn api_key(credential: Option<&CredentialBundle>) -> String {
    credential.map(|c| c.key.clone()).unwrap_or_default()
}

/// Expands a bare blog name to its tumblr.com host name.
#[must_use]
pub fn blog_identifier(word: &str) -> String {
    if word.contains('.') {
        word.to_string()
    } else {
        format!("{word}.tumblr.com")
    }
}

// ==================== TumblrBlogPaginator ====================

/// Offset position within one blog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogCursor {
    /// Total posts, fetched once from blog info
    pub total: Option<u64>,
    /// Next offset to request
    pub offset: u64,
}

/// Pages through every post of a blog by offset.
pub struct TumblrBlogPaginator {
    client: Client,
    base_url: String,
    page_size: u64,
}

impl TumblrBlogPaginator {
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
            client: build_http_client("tumblr", settings)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    async fn fetch_total(&self, blog: &str, key: &str) -> Result<u64, ApiError> {
        let url = format!("{}/v2/blog/{blog}/info", self.base_url);
        let info: Envelope<InfoResponse> = get_json(
            &self.client,
            "tumblr/blog_info",
            &url,
            &[("api_key", key.to_string())],
            None,
        )
        .await?;
        Ok(info.response.blog.posts)
    }
}

impl std::fmt::Debug for TumblrBlogPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TumblrBlogPaginator")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for TumblrBlogPaginator {
    type Item = TumblrPost;
    type Cursor = BlogCursor;

    fn kind(&self) -> &'static str {
        "tumblr"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Tumblr)
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &BlogCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<TumblrPost, BlogCursor>, ApiError> {
        require_term_kind("tumblr", term, TermType::User)?;
        let blog = blog_identifier(&term.word);
        let key = api_key(credential);

        let total = match cursor.total {
            Some(total) => total,
            None => self.fetch_total(&blog, &key).await?,
        };
        if cursor.offset >= total {
            let next = BlogCursor {
                total: Some(total),
                offset: cursor.offset,
            };
            return Ok(Page::last(Vec::new(), next).with_expected_total(Some(total)));
        }

        let url = format!("{}/v2/blog/{blog}/posts", self.base_url);
        let query = [
            ("api_key", key),
            ("limit", self.page_size.to_string()),
            ("offset", cursor.offset.to_string()),
        ];
        let envelope: Envelope<PostsResponse> =
            get_json(&self.client, "tumblr/posts", &url, &query, None).await?;
        let raw_count = envelope.response.posts.len();
        let posts: Vec<TumblrPost> = envelope
            .response
            .posts
            .into_iter()
            .filter_map(normalize)
            .collect();
        debug!(blog = %blog, offset = cursor.offset, total, count = raw_count, "got blog page");

        let next = BlogCursor {
            total: Some(total),
            offset: cursor.offset + self.page_size,
        };
        let exhausted = raw_count == 0 || next.offset >= total;
        let page = if exhausted {
            Page::last(posts, next)
        } else {
            Page::more(posts, next)
        };
        Ok(page.with_expected_total(Some(total)))
    }
}

// ==================== TumblrTagPaginator ====================

/// Pages backward through posts tagged with a word.
///
/// The feed ends when two consecutive pages bring no new blog, or after
/// `max_hosts` distinct blogs.
pub struct TumblrTagPaginator {
    client: Client,
    base_url: String,
    page_size: u64,
    max_hosts: usize,
}

impl TumblrTagPaginator {
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
            client: build_http_client("tumblr", settings)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_hosts: DEFAULT_MAX_HOSTS,
        })
    }

    /// Sets the distinct-blog cap.
    #[must_use]
    pub fn max_hosts(mut self, max_hosts: usize) -> Self {
        self.max_hosts = max_hosts.max(1);
        self
    }
}

impl std::fmt::Debug for TumblrTagPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TumblrTagPaginator")
            .field("base_url", &self.base_url)
            .field("max_hosts", &self.max_hosts)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for TumblrTagPaginator {
    type Item = TumblrPost;
    type Cursor = TagFeedCursor;

    fn kind(&self) -> &'static str {
        "tumblr-tag"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Tumblr)
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &TagFeedCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<TumblrPost, TagFeedCursor>, ApiError> {
        require_term_kind("tumblr tag search", term, TermType::Hashtag)?;
        let url = format!("{}/v2/tagged", self.base_url);
        let mut query = vec![
            ("tag", term.word.clone()),
            ("api_key", api_key(credential)),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(before) = cursor.before {
            query.push(("before", before.to_string()));
        }

        let envelope: Envelope<Vec<RawPost>> =
            get_json(&self.client, "tumblr/tagged", &url, &query, None).await?;
        let posts: Vec<TumblrPost> = envelope.response.into_iter().filter_map(normalize).collect();

        let (next, stagnated) = cursor.advance(
            posts
                .iter()
                .map(|p| (p.timestamp, p.blog_name.as_str())),
        );
        debug!(
            tag = %term.word,
            count = posts.len(),
            hosts = next.seen_hosts.len(),
            stagnant_pages = next.stagnant_pages,
            "got tagged page"
        );

        let exhausted = stagnated || next.seen_hosts.len() >= self.max_hosts;
        Ok(if exhausted {
            Page::last(posts, next)
        } else {
            Page::more(posts, next)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawPost {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_blog_identifier_expands_bare_names() {
        assert_eq!(blog_identifier("staff"), "staff.tumblr.com");
        assert_eq!(blog_identifier("blog.example.com"), "blog.example.com");
    }

    #[test]
    fn test_normalize_photo_prefers_500_size() {
        let post = normalize(raw(
            r#"{
                "id": 7, "blog_name": "b", "timestamp": 1600000000, "type": "photo",
                "caption": "<p>sunset</p>",
                "photos": [{"alt_sizes": [
                    {"url": "https://64.media.tumblr.com/a_1280.jpg"},
                    {"url": "https://64.media.tumblr.com/a_500.jpg"}
                ]}]
            }"#,
        ))
        .unwrap();
        assert_eq!(post.kind, PostKind::Photo);
        assert!(!post.converted);
        assert_eq!(
            post.media[0].remote_url,
            "https://64.media.tumblr.com/a_500.jpg"
        );
    }

    #[test]
    fn test_normalize_text_with_image_becomes_photo() {
        let post = normalize(raw(
            r#"{
                "id": 8, "blog_name": "b", "timestamp": 1600000000, "type": "text",
                "body": "<p>look</p><img src=\"https://x.example.com/pic.png\">"
            }"#,
        ))
        .unwrap();
        assert_eq!(post.kind, PostKind::Photo);
        assert!(post.converted);
        let name = post.media[0].file_name.as_deref().unwrap();
        assert!(name.ends_with(".png"));
        assert_eq!(name, hashed_name("https://x.example.com/pic.png", ".png"));
    }

    #[test]
    fn test_normalize_plain_text_stays_text() {
        let post = normalize(raw(
            r#"{"id": 9, "blog_name": "b", "timestamp": 1600000000, "type": "text", "body": "words"}"#,
        ))
        .unwrap();
        assert_eq!(post.kind, PostKind::Text);
        assert!(post.media.is_empty());
    }

    #[test]
    fn test_normalize_other_kind() {
        let post = normalize(raw(
            r#"{"id": 10, "blog_name": "b", "timestamp": 1600000000, "type": "quote"}"#,
        ))
        .unwrap();
        assert_eq!(post.kind, PostKind::Other);
    }
}
