//! Flickr photosets of a user and photo pools of a group.
//!
//! Photosets page on two levels: the user's photoset list is fetched once
//! (capped at `max_containers`), then each photoset is paged until a page
//! comes back shorter than `per_page`. Group pools page by number.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::http_client::{
    ClientBuildError, HttpSettings, body_failure, build_http_client, get_json,
};
use super::{Page, Paginator, Record, from_unix, require_term_kind};
use crate::credentials::{CredentialBundle, Service};
use crate::error::ApiError;
use crate::media::MediaReference;
use crate::query::{Term, TermType};

/// Default Flickr API base URL.
const DEFAULT_BASE_URL: &str = "https://api.flickr.com";

/// Photos per photoset page.
pub const DEFAULT_PHOTOSET_PAGE_SIZE: u32 = 500;

/// Photos per group pool page.
pub const DEFAULT_GROUP_PAGE_SIZE: u32 = 100;

/// Photosets considered per user.
pub const DEFAULT_MAX_CONTAINERS: usize = 100;

/// Extra photo fields requested with every listing.
const EXTRAS: &str = "date_upload,date_taken,geo,tags,url_m";

// ==================== API Response Types ====================

#[derive(Debug, Deserialize)]
struct UserResponse {
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    nsid: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotosetListResponse {
    photosets: RawPhotosetList,
}

#[derive(Debug, Deserialize)]
struct RawPhotosetList {
    #[serde(default)]
    photoset: Vec<RawPhotoset>,
}

#[derive(Debug, Deserialize)]
struct RawPhotoset {
    id: String,
    #[serde(default)]
    photos: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PhotosetPhotosResponse {
    photoset: RawPhotoPage,
}

#[derive(Debug, Deserialize)]
struct PoolPhotosResponse {
    photos: RawPhotoPage,
}

#[derive(Debug, Deserialize)]
struct RawPhotoPage {
    #[serde(default)]
    photo: Vec<RawPhoto>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    total: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    id: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    dateupload: Option<Value>,
    #[serde(default)]
    datetaken: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    latitude: Option<Value>,
    #[serde(default)]
    longitude: Option<Value>,
    #[serde(default)]
    url_m: Option<String>,
}

/// Reads a number Flickr may send as either a JSON number or a string.
fn loose_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ==================== Record ====================

/// A normalized Flickr photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlickrPhoto {
    /// Photo id
    pub id: String,
    /// Owner NSID
    pub owner: Option<String>,
    /// Photo title
    pub title: String,
    /// Upload time
    pub uploaded_at: DateTime<Utc>,
    /// Time taken, as reported by the camera
    pub taken_at: Option<DateTime<Utc>>,
    /// Space separated tags, split
    #[serde(default)]
    pub tags: Vec<String>,
    /// Latitude, when geotagged
    pub latitude: Option<f64>,
    /// Longitude, when geotagged
    pub longitude: Option<f64>,
    /// Photoset the photo was listed in
    pub photoset_id: Option<String>,
    /// Medium-size image
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Record for FlickrPhoto {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.uploaded_at
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

fn parse_taken(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn normalize(raw: RawPhoto, page_owner: Option<&str>, photoset_id: Option<&str>) -> Option<FlickrPhoto> {
    let taken_at = raw.datetaken.as_deref().and_then(parse_taken);
    #[allow(clippy::cast_possible_truncation)]
    let uploaded_at = loose_number(raw.dateupload.as_ref())
        .and_then(|secs| from_unix(secs as i64))
        .or(taken_at);
    let Some(uploaded_at) = uploaded_at else {
        debug!(id = %raw.id, "dropping photo without a usable date");
        return None;
    };

    let (latitude, longitude) = match (
        loose_number(raw.latitude.as_ref()),
        loose_number(raw.longitude.as_ref()),
    ) {
        // Flickr reports 0,0 for photos without geo data
        (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => (Some(lat), Some(lon)),
        _ => (None, None),
    };

    Some(FlickrPhoto {
        id: raw.id,
        owner: raw.owner.or_else(|| page_owner.map(str::to_string)),
        title: raw.title.unwrap_or_default(),
        uploaded_at,
        taken_at,
        tags: raw
            .tags
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        latitude,
        longitude,
        photoset_id: photoset_id.map(str::to_string),
        media: raw.url_m.into_iter().map(MediaReference::new).collect(),
    })
}

// ==================== Shared REST Client ====================

#[derive(Clone)]
struct FlickrApi {
    client: Client,
    base_url: String,
}

impl FlickrApi {
    fn build(base_url: String, settings: HttpSettings) -> Result<Self, ClientBuildError> {
        Ok(Self {
            client: build_http_client("flickr", settings)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Calls a REST method, unwrapping Flickr's `stat` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<(&str, String)>,
        credential: Option<&CredentialBundle>,
    ) -> Result<T, ApiError> {
        let endpoint = format!("flickr/{method}");
        let url = format!("{}/services/rest/", self.base_url);
        let mut query = vec![
            ("method", method.to_string()),
            ("api_key", credential.map(|c| c.key.clone()).unwrap_or_default()),
            ("format", "json".to_string()),
            ("nojsoncallback", "1".to_string()),
        ];
        query.extend(params);

        let body: Value = get_json(&self.client, &endpoint, &url, &query, None).await?;
        if body.get("stat").and_then(Value::as_str) != Some("ok") {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stat was not ok");
            return Err(body_failure(&endpoint, message));
        }
        serde_json::from_value(body).map_err(|e| ApiError::malformed(&endpoint, e.to_string()))
    }

    async fn resolve_user_id(
        &self,
        word: &str,
        credential: Option<&CredentialBundle>,
    ) -> Result<String, ApiError> {
        // NSIDs look like 12345678@N01 and need no lookup
        if word.contains('@') {
            return Ok(word.to_string());
        }
        let found: UserResponse = self
            .call(
                "flickr.people.findByUsername",
                vec![("username", word.to_string())],
                credential,
            )
            .await?;
        found
            .user
            .nsid
            .or(found.user.id)
            .ok_or_else(|| ApiError::malformed("flickr/flickr.people.findByUsername", "no user id"))
    }
}

// ==================== FlickrPhotosetPaginator ====================

/// Position across a user's photosets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotosetCursor {
    /// Photoset ids, listed on the first call
    pub photosets: Option<Vec<String>>,
    /// Index of the current photoset
    pub index: usize,
    /// Next page within the current photoset (1-indexed; 0 means 1)
    pub page: u32,
    /// Photo count across listed photosets
    pub expected_total: Option<u64>,
}

/// Pages through every photo in a user's photosets.
pub struct FlickrPhotosetPaginator {
    api: FlickrApi,
    per_page: u32,
    max_containers: usize,
}

impl FlickrPhotosetPaginator {
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
            api: FlickrApi::build(base_url.into(), settings)?,
            per_page: DEFAULT_PHOTOSET_PAGE_SIZE,
            max_containers: DEFAULT_MAX_CONTAINERS,
        })
    }

    /// Sets photos per photoset page.
    #[must_use]
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Sets the photoset cap.
    #[must_use]
    pub fn max_containers(mut self, max_containers: usize) -> Self {
        self.max_containers = max_containers;
        self
    }

    async fn list_photosets(
        &self,
        word: &str,
        credential: Option<&CredentialBundle>,
    ) -> Result<(Vec<String>, u64), ApiError> {
        let user_id = self.api.resolve_user_id(word, credential).await?;
        let listed: PhotosetListResponse = self
            .api
            .call(
                "flickr.photosets.getList",
                vec![("user_id", user_id)],
                credential,
            )
            .await?;
        let sets: Vec<RawPhotoset> = listed
            .photosets
            .photoset
            .into_iter()
            .take(self.max_containers)
            .collect();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = sets
            .iter()
            .filter_map(|s| loose_number(s.photos.as_ref()))
            .map(|n| n as u64)
            .sum();
        Ok((sets.into_iter().map(|s| s.id).collect(), total))
    }
}

impl std::fmt::Debug for FlickrPhotosetPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlickrPhotosetPaginator")
            .field("base_url", &self.api.base_url)
            .field("per_page", &self.per_page)
            .field("max_containers", &self.max_containers)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for FlickrPhotosetPaginator {
    type Item = FlickrPhoto;
    type Cursor = PhotosetCursor;

    fn kind(&self) -> &'static str {
        "flickr"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Flickr)
    }

    /// Photosets are listed in no date order.
    fn newest_first(&self) -> bool {
        false
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &PhotosetCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<FlickrPhoto, PhotosetCursor>, ApiError> {
        require_term_kind("flickr", term, TermType::User)?;
        let mut next = cursor.clone();
        if next.photosets.is_none() {
            let (sets, total) = self.list_photosets(&term.word, credential).await?;
            debug!(user = %term.word, photosets = sets.len(), total, "listed photosets");
            next.photosets = Some(sets);
            next.expected_total = Some(total);
            next.index = 0;
            next.page = 1;
        }

        let sets = next.photosets.clone().unwrap_or_default();
        let Some(photoset_id) = sets.get(next.index) else {
            let expected = next.expected_total;
            return Ok(Page::last(Vec::new(), next).with_expected_total(expected));
        };
        let page = next.page.max(1);

        let listed: PhotosetPhotosResponse = self
            .api
            .call(
                "flickr.photosets.getPhotos",
                vec![
                    ("photoset_id", photoset_id.clone()),
                    ("extras", EXTRAS.to_string()),
                    ("page", page.to_string()),
                    ("per_page", self.per_page.to_string()),
                ],
                credential,
            )
            .await?;
        let raw_count = listed.photoset.photo.len();
        let owner = listed.photoset.owner.clone();
        let photos: Vec<FlickrPhoto> = listed
            .photoset
            .photo
            .into_iter()
            .filter_map(|p| normalize(p, owner.as_deref(), Some(photoset_id)))
            .collect();
        debug!(photoset = %photoset_id, page, count = raw_count, "got photoset page");

        if raw_count < self.per_page as usize {
            next.index += 1;
            next.page = 1;
        } else {
            next.page = page + 1;
        }

        let expected = next.expected_total;
        let exhausted = next.index >= sets.len();
        let result = if exhausted {
            Page::last(photos, next)
        } else {
            Page::more(photos, next)
        };
        Ok(result.with_expected_total(expected))
    }
}

// ==================== FlickrGroupPaginator ====================

/// Page position in a group pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCursor {
    /// Next page (1-indexed; 0 means 1)
    pub page: u32,
}

/// Pages through a group's photo pool. The query term is the group id
/// unless one is set with [`FlickrGroupPaginator::group_id`].
pub struct FlickrGroupPaginator {
    api: FlickrApi,
    per_page: u32,
    group_id: Option<String>,
}

impl FlickrGroupPaginator {
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
            api: FlickrApi::build(base_url.into(), settings)?,
            per_page: DEFAULT_GROUP_PAGE_SIZE,
            group_id: None,
        })
    }

    /// Fetches this group regardless of the query term, so a group can be
    /// addressed by name while paging by id.
    #[must_use]
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets photos per page.
    #[must_use]
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }
}

impl std::fmt::Debug for FlickrGroupPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlickrGroupPaginator")
            .field("base_url", &self.api.base_url)
            .field("per_page", &self.per_page)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Paginator for FlickrGroupPaginator {
    type Item = FlickrPhoto;
    type Cursor = GroupCursor;

    fn kind(&self) -> &'static str {
        "flickr-group"
    }

    fn service(&self) -> Option<Service> {
        Some(Service::Flickr)
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &GroupCursor,
        credential: Option<&CredentialBundle>,
    ) -> Result<Page<FlickrPhoto, GroupCursor>, ApiError> {
        let page = cursor.page.max(1);
        let group_id = self.group_id.clone().unwrap_or_else(|| term.word.clone());
        let listed: PoolPhotosResponse = self
            .api
            .call(
                "flickr.groups.pools.getPhotos",
                vec![
                    ("group_id", group_id.clone()),
                    ("extras", EXTRAS.to_string()),
                    ("page", page.to_string()),
                    ("per_page", self.per_page.to_string()),
                ],
                credential,
            )
            .await?;

        let raw_count = listed.photos.photo.len();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = loose_number(listed.photos.total.as_ref()).map(|n| n as u64);
        let photos: Vec<FlickrPhoto> = listed
            .photos
            .photo
            .into_iter()
            .filter_map(|p| normalize(p, None, None))
            .collect();
        debug!(group = %group_id, page, count = raw_count, "got pool page");

        let next = GroupCursor { page: page + 1 };
        let result = if raw_count < self.per_page as usize {
            Page::last(photos, next)
        } else {
            Page::more(photos, next)
        };
        Ok(result.with_expected_total(total))
    }
}
