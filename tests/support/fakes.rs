//! In-memory stand-ins for paginators, sleepers and checkpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use blupen_core::acquire::AcquisitionState;
use blupen_core::credentials::{CredentialBundle, Service};
use blupen_core::error::ApiError;
use blupen_core::media::MediaReference;
use blupen_core::platform::{Page, Paginator, ProbeOutcome, Record};
use blupen_core::query::Term;
use blupen_core::retry::Sleeper;
use blupen_core::snapshot::SnapshotError;
use blupen_core::Checkpoint;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A minimal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

impl Post {
    pub fn new(id: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            at,
            text: String::new(),
            media: Vec::new(),
        }
    }

    pub fn on(id: &str, year: i32, month: u32, day: u32) -> Self {
        Self::new(id, Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap())
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }
}

impl Record for Post {
    fn id(&self) -> &str {
        &self.id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.at
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

pub type Reply = Result<Page<Post, u32>, ApiError>;

/// Serves scripted replies per term word and counts every call.
///
/// Once a term's script runs out, it answers with an empty last page.
#[derive(Debug, Default)]
pub struct ScriptedPaginator {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: AtomicUsize,
    call_log: Mutex<Vec<String>>,
    probe_healthy: bool,
}

impl ScriptedPaginator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for `word`.
    pub fn reply(self, word: &str, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(word.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queues a page for `word`; the cursor advances to the page number.
    pub fn page(self, word: &str, items: Vec<Post>, last: bool) -> Self {
        let next = u32::try_from(self.queued(word) + 1).unwrap();
        let page = if last {
            Page::last(items, next)
        } else {
            Page::more(items, next)
        };
        self.reply(word, Ok(page))
    }

    pub fn healthy_probe(mut self) -> Self {
        self.probe_healthy = true;
        self
    }

    fn queued(&self, word: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .get(word)
            .map_or(0, VecDeque::len)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Term words in the order they were fetched.
    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Paginator for ScriptedPaginator {
    type Item = Post;
    type Cursor = u32;

    fn kind(&self) -> &'static str {
        "fake"
    }

    fn service(&self) -> Option<Service> {
        None
    }

    async fn fetch_page(
        &self,
        term: &Term,
        cursor: &u32,
        _credential: Option<&CredentialBundle>,
    ) -> Result<Page<Post, u32>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(term.word.clone());
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&term.word)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Page::last(Vec::new(), *cursor)))
    }

    async fn probe(&self, _credential: Option<&CredentialBundle>) -> ProbeOutcome {
        if self.probe_healthy {
            ProbeOutcome::Healthy
        } else {
            ProbeOutcome::Unsupported
        }
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

/// Counts checkpoints and keeps the item count of each.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    saved: Mutex<Vec<usize>>,
}

impl MemoryCheckpoint {
    pub fn item_counts(&self) -> Vec<usize> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl<I: Sync, C: Sync> Checkpoint<I, C> for MemoryCheckpoint {
    async fn checkpoint(&self, state: &AcquisitionState<I, C>) -> Result<(), SnapshotError> {
        self.saved.lock().unwrap().push(state.items.len());
        Ok(())
    }
}

/// A transient failure.
pub fn transient(endpoint: &str) -> ApiError {
    ApiError::from_response(endpoint, 503, "service unavailable")
}

/// A rate-limit failure.
pub fn rate_limited(endpoint: &str) -> ApiError {
    ApiError::from_response(endpoint, 429, "Rate limit exceeded")
}
