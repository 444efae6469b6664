//! Content collectors: one paginator, one source, one snapshot.
//!
//! A [`ContentCollector`] ties a platform paginator to a snapshot on disk.
//! `collect` loads the snapshot when one exists, resumes it when it is
//! incomplete, runs a fresh acquisition otherwise, and finally downloads
//! media for the collected items.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::acquire::{Acquisition, AcquisitionState, Checkpoint, RunLimits, Window};
use crate::credentials::CredentialPool;
use crate::error::AcquireError;
use crate::media::{DownloadSummary, MediaDownloader, MediaState};
use crate::platform::{Paginator, Record};
use crate::query::SourceDescriptor;
use crate::retry::{RetryPolicy, RetrySettings};
use crate::snapshot::{SnapshotError, SnapshotId, SnapshotStore};

/// Parameters stored with a snapshot, enough to rebuild its collector.
///
/// Credentials are recorded by worker name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectParams {
    /// Parsed query
    pub descriptor: SourceDescriptor,
    /// Root content directory
    pub content_dir: PathBuf,
    /// Retry tuning
    pub retry: RetrySettings,
    /// Date window
    pub window: Window,
    /// Item cap across terms
    pub max_length: Option<usize>,
    /// Worker names of the credential pool
    pub workers: Vec<String>,
}

/// State type persisted for paginator `P`.
pub type StateOf<P> = AcquisitionState<<P as Paginator>::Item, <P as Paginator>::Cursor>;

/// Writes checkpoints to the snapshot store.
struct SnapshotCheckpoint<'a> {
    store: &'a SnapshotStore,
    id: &'a SnapshotId,
    params: &'a CollectParams,
}

#[async_trait]
impl<I, C> Checkpoint<I, C> for SnapshotCheckpoint<'_>
where
    I: Serialize + Sync,
    C: Serialize + Sync,
{
    async fn checkpoint(&self, state: &AcquisitionState<I, C>) -> Result<(), SnapshotError> {
        self.store.save(self.id, self.params, state).await
    }
}

/// Collects one source from one platform into a snapshot.
pub struct ContentCollector<P: Paginator> {
    paginator: P,
    descriptor: SourceDescriptor,
    store: SnapshotStore,
    snapshot_id: SnapshotId,
    credentials: CredentialPool,
    retry_settings: RetrySettings,
    retry: RetryPolicy,
    window: Window,
    max_length: Option<usize>,
    downloader: Option<MediaDownloader>,
}

impl<P: Paginator> ContentCollector<P> {
    /// Creates a collector with default retry tuning, no window, no cap,
    /// no credentials and no media download.
    pub fn new(paginator: P, descriptor: SourceDescriptor, store: SnapshotStore) -> Self {
        let snapshot_id = SnapshotId::new(descriptor.path_segment.clone(), paginator.kind());
        let retry_settings = RetrySettings::default();
        Self {
            paginator,
            descriptor,
            store,
            snapshot_id,
            credentials: CredentialPool::default(),
            retry: retry_settings.policy(),
            retry_settings,
            window: Window::default(),
            max_length: None,
            downloader: None,
        }
    }

    /// Sets the credential pool.
    #[must_use]
    pub fn credentials(mut self, credentials: CredentialPool) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets retry tuning.
    #[must_use]
    pub fn retry(mut self, settings: RetrySettings) -> Self {
        self.retry = settings.policy();
        self.retry_settings = settings;
        self
    }

    /// Replaces the retry policy, keeping the recorded tuning.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the date window.
    #[must_use]
    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Caps the number of items across all terms.
    #[must_use]
    pub fn max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Enables media download after acquisition.
    #[must_use]
    pub fn media(mut self, downloader: MediaDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Names the snapshot file differently from its directory.
    #[must_use]
    pub fn snapshot_stem(mut self, stem: impl Into<String>) -> Self {
        self.snapshot_id = self.snapshot_id.with_stem(stem);
        self
    }

    /// The paginator this collector drives.
    #[must_use]
    pub fn paginator(&self) -> &P {
        &self.paginator
    }

    /// The query descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Where the snapshot lives.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.store.path(&self.snapshot_id)
    }

    /// Directory media is downloaded into.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.store.directory(&self.snapshot_id)
    }

    /// Parameters recorded with the snapshot.
    #[must_use]
    pub fn params(&self) -> CollectParams {
        CollectParams {
            descriptor: self.descriptor.clone(),
            content_dir: self.store.content_dir().to_path_buf(),
            retry: self.retry_settings,
            window: self.window,
            max_length: self.max_length,
            workers: self.credentials.worker_names(),
        }
    }

    /// Loads the snapshot, or `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Snapshot`] for corrupt or unsupported files.
    pub async fn load(&self) -> Result<Option<StateOf<P>>, AcquireError> {
        let Some(snapshot) = self
            .store
            .load::<CollectParams, StateOf<P>>(&self.snapshot_id)
            .await?
        else {
            return Ok(None);
        };
        let mut state = snapshot.state;
        let dropped = state.rebuild_index();
        if dropped > 0 {
            warn!(dropped, "snapshot held duplicate items");
        }
        Ok(Some(state))
    }

    /// Deletes the snapshot. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Snapshot`] when the file cannot be removed.
    pub async fn purge(&self) -> Result<bool, AcquireError> {
        Ok(self.store.purge(&self.snapshot_id).await?)
    }

    /// Collects content: loads or resumes the snapshot, or acquires from
    /// scratch, then downloads media when enabled.
    ///
    /// With `purge`, any existing snapshot is deleted first.
    ///
    /// # Errors
    ///
    /// See [`Acquisition::run`]. A source with no content leaves no
    /// snapshot behind, so the next run starts over.
    #[instrument(skip(self), fields(source = %self.descriptor.log_label, kind = self.paginator.kind()))]
    pub async fn collect(&self, purge: bool) -> Result<StateOf<P>, AcquireError> {
        if purge && self.purge().await? {
            info!("purged snapshot");
        }

        let mut state = match self.load().await? {
            Some(state) if state.content_complete => {
                info!(items = state.items.len(), "loaded complete snapshot");
                state
            }
            Some(state) => {
                info!(items = state.items.len(), "resuming incomplete snapshot");
                state
            }
            None => {
                info!("no snapshot, starting acquisition");
                AcquisitionState::new(&self.descriptor.terms)
            }
        };

        let params = self.params();
        let checkpoint = SnapshotCheckpoint {
            store: &self.store,
            id: &self.snapshot_id,
            params: &params,
        };
        let limits = RunLimits {
            window: self.window,
            max_length: self.max_length,
            now: Utc::now(),
        };
        let acquisition = Acquisition::new(
            &self.paginator,
            &self.descriptor,
            &self.credentials,
            &self.retry,
            limits,
        );

        match acquisition.run(&mut state, &checkpoint).await {
            Ok(()) => {}
            Err(error @ AcquireError::NoContentFound { .. }) => {
                self.purge().await?;
                return Err(error);
            }
            Err(error) => return Err(error),
        }

        if let Some(downloader) = &self.downloader {
            let before = media_states(&state);
            download_media(downloader, &mut state, &self.media_dir()).await;
            if media_states(&state) != before {
                checkpoint.checkpoint(&state).await?;
            }
        }
        Ok(state)
    }
}

/// Downloads media of every item into `dir`.
pub async fn download_media<I: Record, C>(
    downloader: &MediaDownloader,
    state: &mut AcquisitionState<I, C>,
    dir: &Path,
) -> DownloadSummary {
    let references = state
        .items
        .iter_mut()
        .flat_map(|item| item.media_mut().iter_mut());
    downloader.download_all(references, dir).await
}

fn media_states<I: Record, C>(state: &AcquisitionState<I, C>) -> Vec<MediaState> {
    state
        .items
        .iter()
        .flat_map(|item| item.media().iter().map(|media| media.state.clone()))
        .collect()
}

impl<P: Paginator + std::fmt::Debug> std::fmt::Debug for ContentCollector<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCollector")
            .field("paginator", &self.paginator)
            .field("source", &self.descriptor.log_label)
            .field("snapshot", &self.snapshot_path())
            .field("workers", &self.credentials.worker_names())
            .finish_non_exhaustive()
    }
}
