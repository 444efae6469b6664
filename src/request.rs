//! Work-queue request documents.
//!
//! A request names one service and lists authors (or, for Flickr, groups)
//! with an `include` flag:
//!
//! ```json
//! {
//!   "service": "twitter",
//!   "authors": [{ "include": true, "screen_name": "alice" }]
//! }
//! ```
//!
//! [`run_request`] collects every included entry and returns the outgoing
//! document, which lists only the included entries. Queue directories and
//! their locking are handled elsewhere.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::runner::{CollectJob, CollectReport, JobRunner, Platform, RunError};

/// Service named by a request document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestService {
    /// Web feeds, one per author `url`
    Feed,
    /// Flickr group pools, one per group `name` and `nsid`
    Flickr,
    /// Tumblr blogs, one per author `url`
    Tumblr,
    /// Twitter timelines, one per author `screen_name`
    Twitter,
}

/// One author or group entry. Fields other than `include` are kept as-is
/// so the outgoing document carries them forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEntry {
    /// Whether to collect this entry
    #[serde(default)]
    pub include: bool,
    /// Remaining entry fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RequestEntry {
    fn field(&self, name: &'static str) -> Result<&str, RequestError> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(RequestError::MissingField { field: name })
    }
}

/// A queue request document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectRequest {
    /// Service to collect from
    pub service: RequestService,
    /// Authors, for feed, tumblr and twitter requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<RequestEntry>,
    /// Groups, for flickr requests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RequestEntry>,
}

/// Why a request document or one of its entries could not be used.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The document is not valid JSON for a request
    #[error("invalid request document: {0}")]
    Json(#[from] serde_json::Error),

    /// An included entry lacks a field its service needs
    #[error("entry is missing '{field}'")]
    MissingField {
        /// Field name
        field: &'static str,
    },

    /// An author URL could not be parsed
    #[error("invalid author url '{url}'")]
    InvalidUrl {
        /// The offending URL
        url: String,
    },
}

impl CollectRequest {
    /// Parses a request document.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Json`] for malformed documents.
    pub fn from_json(text: &str) -> Result<Self, RequestError> {
        Ok(serde_json::from_str(text)?)
    }

    fn entries(&self) -> &[RequestEntry] {
        match self.service {
            RequestService::Flickr => &self.groups,
            _ => &self.authors,
        }
    }

    /// Included entries paired with the job each one maps to.
    pub fn jobs(&self) -> Vec<(&RequestEntry, Result<CollectJob, RequestError>)> {
        self.entries()
            .iter()
            .filter(|entry| entry.include)
            .map(|entry| (entry, self.job_for(entry)))
            .collect()
    }

    fn job_for(&self, entry: &RequestEntry) -> Result<CollectJob, RequestError> {
        match self.service {
            RequestService::Feed => Ok(CollectJob::new(Platform::Feed, entry.field("url")?)),
            RequestService::Flickr => {
                let name = entry.field("name")?;
                let nsid = entry.field("nsid")?;
                Ok(CollectJob::new(Platform::FlickrGroup, format!("@{name}")).group_id(nsid))
            }
            RequestService::Tumblr => {
                let raw = entry.field("url")?;
                let host = Url::parse(raw)
                    .ok()
                    .and_then(|url| url.host_str().map(str::to_string))
                    .ok_or_else(|| RequestError::InvalidUrl {
                        url: raw.to_string(),
                    })?;
                Ok(CollectJob::new(Platform::Tumblr, host))
            }
            RequestService::Twitter => {
                let screen_name = entry.field("screen_name")?;
                Ok(CollectJob::new(
                    Platform::Twitter,
                    format!("@{}", screen_name.trim_start_matches('@')),
                ))
            }
        }
    }
}

/// An included entry that could not be collected.
#[derive(Debug)]
pub struct EntryFailure {
    /// The entry
    pub entry: RequestEntry,
    /// The job, when the entry could be mapped to one
    pub job: Option<CollectJob>,
    /// What went wrong
    pub error: EntryError,
}

/// Failure cause for one entry.
#[derive(Debug, Error)]
pub enum EntryError {
    /// The entry itself was unusable
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Collection failed
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Result of processing a request document.
#[derive(Debug)]
pub struct RequestOutcome {
    /// Document for the next queue: included entries only
    pub outgoing: CollectRequest,
    /// Reports for entries that were collected
    pub reports: Vec<CollectReport>,
    /// Entries that failed
    pub failures: Vec<EntryFailure>,
}

impl RequestOutcome {
    /// Whether any failure asks for a later retry.
    #[must_use]
    pub fn has_retry_later(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(&f.error, EntryError::Run(e) if e.is_retry_later()))
    }
}

/// Collects every included entry of `request`, in document order.
///
/// A failing entry is logged and recorded; the remaining entries are still
/// collected.
#[instrument(skip(request, runner), fields(service = ?request.service))]
pub async fn run_request(
    request: &CollectRequest,
    runner: &dyn JobRunner,
    purge: bool,
) -> RequestOutcome {
    let mut included = Vec::new();
    let mut reports = Vec::new();
    let mut failures = Vec::new();

    for (entry, job) in request.jobs() {
        included.push(entry.clone());
        let job = match job {
            Ok(job) => job,
            Err(error) => {
                warn!(%error, "skipping request entry");
                failures.push(EntryFailure {
                    entry: entry.clone(),
                    job: None,
                    error: error.into(),
                });
                continue;
            }
        };
        match runner.run_job(&job, purge).await {
            Ok(report) => reports.push(report),
            Err(error) => {
                warn!(platform = %job.platform, query = %job.query, %error, "collection failed");
                failures.push(EntryFailure {
                    entry: entry.clone(),
                    job: Some(job),
                    error: error.into(),
                });
            }
        }
    }

    info!(
        included = included.len(),
        collected = reports.len(),
        failed = failures.len(),
        "request processed"
    );

    let (authors, groups) = match request.service {
        RequestService::Flickr => (Vec::new(), included),
        _ => (included, Vec::new()),
    };
    RequestOutcome {
        outgoing: CollectRequest {
            service: request.service,
            authors,
            groups,
        },
        reports,
        failures,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_twitter_request_maps_screen_names_to_user_queries() {
        let request = CollectRequest::from_json(
            r#"{"service":"twitter","authors":[
                {"include":true,"screen_name":"alice","followers":12},
                {"include":false,"screen_name":"bob"}
            ]}"#,
        )
        .unwrap();

        let jobs = request.jobs();
        assert_eq!(jobs.len(), 1);
        let job = jobs[0].1.as_ref().unwrap();
        assert_eq!(job.platform, Platform::Twitter);
        assert_eq!(job.query, "@alice");
    }

    #[test]
    fn test_flickr_request_uses_group_name_and_nsid() {
        let request = CollectRequest::from_json(
            r#"{"service":"flickr","groups":[{"include":true,"name":"harbours","nsid":"123@N01"}]}"#,
        )
        .unwrap();

        let jobs = request.jobs();
        let job = jobs[0].1.as_ref().unwrap();
        assert_eq!(job.platform, Platform::FlickrGroup);
        assert_eq!(job.query, "@harbours");
        assert_eq!(job.group_id.as_deref(), Some("123@N01"));
    }

    #[test]
    fn test_tumblr_request_uses_url_host() {
        let request = CollectRequest::from_json(
            r#"{"service":"tumblr","authors":[{"include":true,"url":"https://alice.tumblr.com/"}]}"#,
        )
        .unwrap();

        let jobs = request.jobs();
        assert_eq!(jobs[0].1.as_ref().unwrap().query, "alice.tumblr.com");
    }

    #[test]
    fn test_missing_field_is_reported_per_entry() {
        let request =
            CollectRequest::from_json(r#"{"service":"feed","authors":[{"include":true}]}"#)
                .unwrap();

        let jobs = request.jobs();
        assert!(matches!(
            jobs[0].1,
            Err(RequestError::MissingField { field: "url" })
        ));
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        let err = CollectRequest::from_json(r#"{"service":"myspace","authors":[]}"#).unwrap_err();
        assert!(matches!(err, RequestError::Json(_)));
    }

    #[test]
    fn test_entry_fields_survive_serialization() {
        let entry: RequestEntry =
            serde_json::from_str(r#"{"include":true,"url":"https://a.example/rss","score":3}"#)
                .unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["score"], 3);
        assert_eq!(value["include"], true);
    }
}
