//! Blupen Core Library
//!
//! Collects creative content (tweets, posts, photos, feed entries) by an
//! author, a group or a hashtag, stores it locally as resumable snapshots,
//! and downloads the media it references.
//!
//! # Architecture
//!
//! - [`query`] - Source word parsing (`@user`, `#tag`, `a+b`)
//! - [`credentials`] - Per-service credential pools
//! - [`retry`] - Failure classification and exponential backoff
//! - [`platform`] - One paginator per platform API
//! - [`acquire`] - The resumable fetch, filter and checkpoint loop
//! - [`snapshot`] - Versioned JSON snapshots on disk
//! - [`media`] - Idempotent media downloads
//! - [`collector`] - Ties a paginator to a snapshot
//! - [`runner`] - Platform selection and job execution
//! - [`request`] - Work-queue request documents

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod collector;
pub mod credentials;
pub mod error;
pub mod media;
pub mod platform;
pub mod query;
pub mod request;
pub mod retry;
pub mod runner;
pub mod snapshot;
mod user_agent;

// Re-export commonly used types
pub use acquire::{Acquisition, AcquisitionState, Checkpoint, RunLimits, TextSymbol, Window};
pub use collector::{CollectParams, ContentCollector, StateOf};
pub use credentials::{CredentialBundle, CredentialPool, Credentials, Service};
pub use error::{AcquireError, ApiError};
pub use media::{DownloadError, DownloadSummary, MediaDownloader, MediaReference, MediaState};
pub use platform::{ClientBuildError, HttpSettings, Page, Paginator, ProbeOutcome, Record};
pub use query::{QueryError, SourceDescriptor, Term, TermType, parse, parse_with_default};
pub use request::{CollectRequest, RequestError, RequestOutcome, RequestService, run_request};
pub use retry::{
    Classify, FailureType, RetryDecision, RetryError, RetryPolicy, RetrySettings, Sleeper,
    TokioSleeper,
};
pub use runner::{
    BaseUrls, CollectJob, CollectReport, JobRunner, Platform, RunError, Runner, RunnerSettings,
};
pub use snapshot::{SCHEMA_VERSION, SnapshotError, SnapshotId, SnapshotStore};
