//! The acquisition loop: fetch, filter, checkpoint, repeat.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::state::{AcquisitionState, PageFilter, Window};
use crate::credentials::{CredentialBundle, CredentialPool};
use crate::error::{AcquireError, ApiError};
use crate::platform::{Paginator, ProbeOutcome};
use crate::query::SourceDescriptor;
use crate::retry::{RetryError, RetryPolicy};
use crate::snapshot::SnapshotError;

/// Where state is persisted after every page.
#[async_trait]
pub trait Checkpoint<I, C>: Send + Sync {
    /// Persists the full state.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] when the state cannot be written.
    async fn checkpoint(&self, state: &AcquisitionState<I, C>) -> Result<(), SnapshotError>;
}

/// Limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    /// Configured date window
    pub window: Window,
    /// Items across all terms
    pub max_length: Option<usize>,
    /// Current time, fixed for the whole run
    pub now: DateTime<Utc>,
}

/// Drives one paginator for one source descriptor.
///
/// Terms are served round-robin, one page per active term per pass, so a
/// term that ends early never holds up the other. Every network call and
/// every backoff sleep is awaited in sequence.
pub struct Acquisition<'a, P: Paginator> {
    paginator: &'a P,
    descriptor: &'a SourceDescriptor,
    credentials: &'a CredentialPool,
    retry: &'a RetryPolicy,
    filter: PageFilter,
}

impl<'a, P: Paginator> Acquisition<'a, P> {
    /// Creates a run.
    pub fn new(
        paginator: &'a P,
        descriptor: &'a SourceDescriptor,
        credentials: &'a CredentialPool,
        retry: &'a RetryPolicy,
        limits: RunLimits,
    ) -> Self {
        let filter = PageFilter::new(
            limits.now,
            paginator.platform_start(),
            limits.window,
            limits.max_length,
            descriptor.terms.len(),
        )
        .newest_first(paginator.newest_first());
        Self {
            paginator,
            descriptor,
            credentials,
            retry,
            filter,
        }
    }

    fn draw_credential(&self) -> Option<&'a CredentialBundle> {
        self.paginator.service()?;
        self.credentials.next()
    }

    /// Runs until every term is exhausted, then marks the state complete.
    ///
    /// A state that is already complete is returned untouched with no
    /// network calls.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::RateLimited`] / [`AcquireError::CapacityExceeded`]:
    ///   retry later; progress up to the last page is checkpointed
    /// - [`AcquireError::NoContentFound`]: no term produced anything
    /// - [`AcquireError::AcquisitionFailed`]: retries ran out
    /// - [`AcquireError::InvalidRequest`]: a paginator contract was violated
    /// - [`AcquireError::Snapshot`]: a checkpoint could not be written
    #[instrument(skip(self, state, checkpoint), fields(source = %self.descriptor.log_label, kind = self.paginator.kind()))]
    pub async fn run(
        &self,
        state: &mut AcquisitionState<P::Item, P::Cursor>,
        checkpoint: &dyn Checkpoint<P::Item, P::Cursor>,
    ) -> Result<(), AcquireError> {
        if state.content_complete {
            debug!(items = state.items.len(), "snapshot complete, nothing to fetch");
            return Ok(());
        }
        if self.credentials.is_empty() && let Some(service) = self.paginator.service() {
            warn!(%service, "no credentials configured, requests are unauthenticated");
        }

        loop {
            let active = state.active_terms();
            if active.is_empty() {
                break;
            }
            for index in active {
                if let Err(error) = self.step(state, index).await {
                    return Err(self.fail(state, error).await);
                }
                checkpoint.checkpoint(state).await?;
            }
        }

        if state.items.is_empty() {
            info!(filtered = ?state.filtered, "no content found");
            return Err(AcquireError::NoContentFound {
                source_label: self.descriptor.log_label.clone(),
            });
        }

        self.log_shortfall(state);
        state.finish();
        checkpoint.checkpoint(state).await?;
        info!(
            items = state.items.len(),
            earliest = ?state.derived_stats.earliest,
            latest = ?state.derived_stats.latest,
            duplicates = state.filtered.duplicates,
            "acquisition complete"
        );
        Ok(())
    }

    async fn step(
        &self,
        state: &mut AcquisitionState<P::Item, P::Cursor>,
        index: usize,
    ) -> Result<(), RetryError<ApiError>> {
        let Some(progress) = state.terms.get(index) else {
            return Ok(());
        };
        let term = progress.term.clone();
        let cursor = progress.cursor.clone();
        let label = format!("{} {}", self.paginator.kind(), term.display());

        let page = self
            .retry
            .execute(&label, |_attempt| {
                self.paginator
                    .fetch_page(&term, &cursor, self.draw_credential())
            })
            .await?;

        let report = state.apply_page(index, page, &self.filter);
        debug!(
            term = %term.display(),
            fetched = report.fetched,
            accepted = report.accepted,
            duplicates = report.filtered.duplicates,
            after_platform_stop = report.filtered.after_platform_stop,
            before_platform_start = report.filtered.before_platform_start,
            after_window_stop = report.filtered.after_window_stop,
            repeated = report.repeated,
            term_done = report.term_done,
            total = state.items.len(),
            "page applied"
        );
        if report.term_done {
            info!(term = %term.display(), "term exhausted");
        }
        Ok(())
    }

    /// Maps a failed page to the caller-facing error. When retries ran out
    /// before anything was collected, a healthy platform probe means the
    /// source simply has no content.
    async fn fail(
        &self,
        state: &AcquisitionState<P::Item, P::Cursor>,
        error: RetryError<ApiError>,
    ) -> AcquireError {
        let exhausted = matches!(error, RetryError::Exhausted { .. });
        let failure = AcquireError::from_retry(&self.descriptor.log_label, error);
        if !exhausted || !state.items.is_empty() {
            return failure;
        }

        match self.paginator.probe(self.draw_credential()).await {
            ProbeOutcome::Healthy => {
                info!("platform probe succeeded, source has no content");
                AcquireError::NoContentFound {
                    source_label: self.descriptor.log_label.clone(),
                }
            }
            ProbeOutcome::Unhealthy(cause) => {
                warn!(error = %cause, "platform probe failed");
                failure
            }
            ProbeOutcome::Unsupported => failure,
        }
    }

    fn log_shortfall(&self, state: &AcquisitionState<P::Item, P::Cursor>) {
        let Some(claimed) = state.expected_total() else {
            return;
        };
        let expected = match self.filter.per_term_cap {
            Some(cap) => claimed.min(u64::try_from(cap * state.terms.len()).unwrap_or(u64::MAX)),
            None => claimed,
        };
        let found = u64::try_from(state.items.len()).unwrap_or(u64::MAX);
        if found < expected {
            info!(
                found,
                expected,
                missing = expected - found,
                "found fewer items than expected"
            );
        }
    }
}

impl<P: Paginator + std::fmt::Debug> std::fmt::Debug for Acquisition<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("paginator", &self.paginator)
            .field("source", &self.descriptor.log_label)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
