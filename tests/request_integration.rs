//! Integration tests for request documents driven through a recording runner.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use blupen_core::error::{AcquireError, ApiError};
use blupen_core::request::{CollectRequest, EntryError, RequestError, run_request};
use blupen_core::runner::{CollectJob, CollectReport, JobRunner, Platform, RunError};

/// Records every job and fails the queries it was told to fail.
#[derive(Debug, Default)]
struct RecordingRunner {
    jobs: Mutex<Vec<(CollectJob, bool)>>,
    rate_limited: Vec<String>,
    empty: Vec<String>,
}

impl RecordingRunner {
    fn rate_limit(mut self, query: &str) -> Self {
        self.rate_limited.push(query.to_string());
        self
    }

    fn empty(mut self, query: &str) -> Self {
        self.empty.push(query.to_string());
        self
    }

    fn queries(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(job, _)| job.query.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl JobRunner for RecordingRunner {
    async fn run_job(&self, job: &CollectJob, purge: bool) -> Result<CollectReport, RunError> {
        self.jobs.lock().unwrap().push((job.clone(), purge));
        let source_label = job.query.clone();
        if self.rate_limited.contains(&job.query) {
            return Err(AcquireError::RateLimited {
                source_label,
                cause: ApiError::from_response("test", 429, "Rate limit exceeded"),
            }
            .into());
        }
        if self.empty.contains(&job.query) {
            return Err(AcquireError::NoContentFound { source_label }.into());
        }
        Ok(CollectReport {
            platform: job.platform,
            source: source_label,
            items: 3,
            complete: true,
            snapshot: PathBuf::from("content").join(&job.query),
            media_downloaded: 0,
            media_failed: 0,
        })
    }
}

// ==================== Processing Tests ====================

#[tokio::test]
async fn test_only_included_entries_are_collected_and_forwarded() {
    let request = CollectRequest::from_json(
        r#"{"service":"twitter","authors":[
            {"include":true,"screen_name":"alice","followers":10},
            {"include":false,"screen_name":"bob"},
            {"include":true,"screen_name":"carol"}
        ]}"#,
    )
    .unwrap();
    let runner = RecordingRunner::default();

    let outcome = run_request(&request, &runner, false).await;

    assert_eq!(runner.queries(), vec!["@alice", "@carol"]);
    assert_eq!(outcome.reports.len(), 2);
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.outgoing.authors.len(), 2);
    assert!(outcome.outgoing.groups.is_empty());

    let outgoing = serde_json::to_value(&outcome.outgoing).unwrap();
    assert_eq!(outgoing["service"], "twitter");
    assert_eq!(outgoing["authors"][0]["followers"], 10);
    assert_eq!(outgoing["authors"][1]["screen_name"], "carol");
}

#[tokio::test]
async fn test_failing_entries_do_not_stop_processing() {
    let request = CollectRequest::from_json(
        r#"{"service":"feed","authors":[
            {"include":true,"url":"https://one.example/rss"},
            {"include":true},
            {"include":true,"url":"https://two.example/rss"},
            {"include":true,"url":"https://three.example/rss"}
        ]}"#,
    )
    .unwrap();
    let runner = RecordingRunner::default().empty("https://two.example/rss");

    let outcome = run_request(&request, &runner, true).await;

    assert_eq!(
        runner.queries(),
        vec![
            "https://one.example/rss",
            "https://two.example/rss",
            "https://three.example/rss"
        ]
    );
    assert!(runner.jobs.lock().unwrap().iter().all(|(_, purge)| *purge));
    assert_eq!(outcome.reports.len(), 2);
    assert_eq!(outcome.failures.len(), 2);
    assert!(matches!(
        outcome.failures[0].error,
        EntryError::Request(RequestError::MissingField { field: "url" })
    ));
    assert!(outcome.failures[0].job.is_none());
    assert_eq!(
        outcome.failures[1].job.as_ref().map(|j| j.platform),
        Some(Platform::Feed)
    );
    assert!(!outcome.has_retry_later());
    // Every included entry is forwarded, collected or not.
    assert_eq!(outcome.outgoing.authors.len(), 4);
}

#[tokio::test]
async fn test_rate_limited_entry_marks_outcome_retry_later() {
    let request = CollectRequest::from_json(
        r#"{"service":"flickr","groups":[
            {"include":true,"name":"harbours","nsid":"1@N01"},
            {"include":true,"name":"bridges","nsid":"2@N01"}
        ]}"#,
    )
    .unwrap();
    let runner = RecordingRunner::default().rate_limit("@harbours");

    let outcome = run_request(&request, &runner, false).await;

    assert_eq!(runner.queries(), vec!["@harbours", "@bridges"]);
    assert!(outcome.has_retry_later());
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.outgoing.groups.len(), 2);
    assert!(outcome.outgoing.authors.is_empty());
}
