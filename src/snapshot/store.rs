//! Disk-backed snapshot store with atomic replacement.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::SnapshotError;

/// Schema version written by, and the only version read by, this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Addresses one snapshot file below the content directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId {
    /// Directory under the content directory
    pub segment: String,
    /// File name stem
    pub stem: String,
    /// Snapshot kind, e.g. `twitter` or `flickr-group`
    pub kind: String,
}

impl SnapshotId {
    /// An id whose file stem equals its directory segment.
    #[must_use]
    pub fn new(segment: impl Into<String>, kind: impl Into<String>) -> Self {
        let segment = segment.into();
        Self {
            stem: segment.clone(),
            segment,
            kind: kind.into(),
        }
    }

    /// Overrides the file stem.
    #[must_use]
    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = stem.into();
        self
    }
}

/// A loaded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<P, S> {
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
    /// Parameters that reconstruct the collector
    pub params: P,
    /// Acquisition state
    pub state: S,
}

#[derive(Serialize)]
struct EnvelopeOut<'a, P, S> {
    schema_version: u32,
    kind: &'a str,
    saved_at: DateTime<Utc>,
    params: &'a P,
    state: &'a S,
}

#[derive(Deserialize)]
struct EnvelopeIn<P, S> {
    kind: String,
    saved_at: DateTime<Utc>,
    params: P,
    state: S,
}

/// Reads and writes versioned JSON snapshots.
///
/// Files live at `<content_dir>/<segment>/<stem>.<kind>.json`. A single
/// writer per file is assumed.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    content_dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store rooted at `content_dir`.
    #[must_use]
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
        }
    }

    /// Root content directory.
    #[must_use]
    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Directory holding the snapshot and its media.
    #[must_use]
    pub fn directory(&self, id: &SnapshotId) -> PathBuf {
        self.content_dir.join(&id.segment)
    }

    /// Full snapshot file path.
    #[must_use]
    pub fn path(&self, id: &SnapshotId) -> PathBuf {
        self.directory(id)
            .join(format!("{}.{}.json", id.stem, id.kind))
    }

    /// Whether a snapshot file exists.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] when existence cannot be determined.
    pub async fn exists(&self, id: &SnapshotId) -> Result<bool, SnapshotError> {
        let path = self.path(id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SnapshotError::io(&path, e))
    }

    /// Loads a snapshot, or `None` when no file exists.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::UnsupportedVersion`] for any schema version other
    ///   than [`SCHEMA_VERSION`]
    /// - [`SnapshotError::Corrupt`] when the file cannot be decoded, or was
    ///   written for a different kind
    /// - [`SnapshotError::Io`] on read failure
    #[instrument(skip(self), fields(kind = %id.kind, segment = %id.segment))]
    pub async fn load<P, S>(&self, id: &SnapshotId) -> Result<Option<Snapshot<P, S>>, SnapshotError>
    where
        P: DeserializeOwned,
        S: DeserializeOwned,
    {
        let path = self.path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SnapshotError::io(&path, e)),
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| SnapshotError::corrupt(&path, e.to_string()))?;
        let Some(version) = value.get("schema_version").and_then(Value::as_u64) else {
            return Err(SnapshotError::corrupt(&path, "missing schema_version"));
        };
        if version != u64::from(SCHEMA_VERSION) {
            return Err(SnapshotError::UnsupportedVersion {
                path,
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        let envelope: EnvelopeIn<P, S> =
            serde_json::from_value(value).map_err(|e| SnapshotError::corrupt(&path, e.to_string()))?;
        if envelope.kind != id.kind {
            return Err(SnapshotError::corrupt(
                &path,
                format!("kind is {}, expected {}", envelope.kind, id.kind),
            ));
        }

        debug!(path = %path.display(), saved_at = %envelope.saved_at, "loaded snapshot");
        Ok(Some(Snapshot {
            saved_at: envelope.saved_at,
            params: envelope.params,
            state: envelope.state,
        }))
    }

    /// Writes a snapshot atomically: a sibling temporary file is written,
    /// synced, and renamed over the target.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] on write failure, or
    /// [`SnapshotError::Corrupt`] if the snapshot cannot be serialized.
    pub async fn save<P, S>(&self, id: &SnapshotId, params: &P, state: &S) -> Result<(), SnapshotError>
    where
        P: Serialize + Sync,
        S: Serialize + Sync,
    {
        let dir = self.directory(id);
        let path = self.path(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SnapshotError::io(&dir, e))?;

        let envelope = EnvelopeOut {
            schema_version: SCHEMA_VERSION,
            kind: &id.kind,
            saved_at: Utc::now(),
            params,
            state,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| SnapshotError::corrupt(&path, e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        if let Err(e) = write_synced(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SnapshotError::io(&tmp, e));
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SnapshotError::io(&path, e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "saved snapshot");
        Ok(())
    }

    /// Deletes a snapshot. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] when the file exists but cannot be removed.
    pub async fn purge(&self, id: &SnapshotId) -> Result<bool, SnapshotError> {
        let path = self.path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "purged snapshot");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SnapshotError::io(&path, e)),
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        label: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct State {
        ids: Vec<u32>,
        complete: bool,
    }

    fn params() -> Params {
        Params {
            label: "alice".to_string(),
        }
    }

    // ==================== Path Tests ====================

    #[test]
    fn test_path_layout() {
        let store = SnapshotStore::new("/content");
        let id = SnapshotId::new("by_alice", "twitter");
        assert_eq!(
            store.path(&id),
            PathBuf::from("/content/by_alice/by_alice.twitter.json")
        );
        let id = SnapshotId::new("pool", "flickr-group").with_stem("123@N01");
        assert_eq!(
            store.path(&id),
            PathBuf::from("/content/pool/123@N01.flickr-group.json")
        );
    }

    // ==================== Save / Load Tests ====================

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "twitter");
        assert!(!store.exists(&id).await.unwrap());
        let loaded: Option<Snapshot<Params, State>> = store.load(&id).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "twitter");

        let first = State {
            ids: vec![1],
            complete: false,
        };
        store.save(&id, &params(), &first).await.unwrap();
        let second = State {
            ids: vec![1, 2],
            complete: true,
        };
        store.save(&id, &params(), &second).await.unwrap();

        let loaded: Snapshot<Params, State> = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.state, second);
        assert_eq!(loaded.params, params());

        let names: Vec<String> = std::fs::read_dir(store.directory(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["by_a.twitter.json".to_string()]);
    }

    #[tokio::test]
    async fn test_envelope_fields_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "tumblr");
        let state = State {
            ids: vec![],
            complete: false,
        };
        store.save(&id, &params(), &state).await.unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(store.path(&id)).unwrap()).unwrap();
        assert_eq!(raw["schema_version"], 1);
        assert_eq!(raw["kind"], "tumblr");
        assert!(raw["saved_at"].is_string());
        assert_eq!(raw["params"]["label"], "alice");
    }

    // ==================== Error Tests ====================

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "twitter");
        std::fs::create_dir_all(store.directory(&id)).unwrap();
        std::fs::write(store.path(&id), b"{ not json").unwrap();

        let err = store.load::<Params, State>(&id).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_other_schema_version_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "twitter");
        std::fs::create_dir_all(store.directory(&id)).unwrap();
        std::fs::write(
            store.path(&id),
            br#"{"schema_version": 2, "kind": "twitter", "saved_at": "2020-01-01T00:00:00Z", "params": {}, "state": {}}"#,
        )
        .unwrap();

        let err = store.load::<Params, State>(&id).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion { found: 2, .. }));
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let written = SnapshotId::new("by_a", "twitter");
        let state = State {
            ids: vec![],
            complete: true,
        };
        store.save(&written, &params(), &state).await.unwrap();
        std::fs::rename(
            store.path(&written),
            store.path(&SnapshotId::new("by_a", "tumblr")),
        )
        .unwrap();

        let err = store
            .load::<Params, State>(&SnapshotId::new("by_a", "tumblr"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_purge() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        let id = SnapshotId::new("by_a", "twitter");
        let state = State {
            ids: vec![],
            complete: true,
        };
        store.save(&id, &params(), &state).await.unwrap();
        assert!(store.purge(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());
        assert!(!store.purge(&id).await.unwrap());
    }
}
