//! Shared test doubles for the stage runner, queues and tracker.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::StageError;
use crate::pipeline::{ImageFetcher, ImageTransform, StageRunner};
use crate::store::{Photo, RecordStore};
use crate::tracker::ViewAdapter;
use crate::types::RowId;

/// How long tests wait for something that should happen
pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// How long tests wait to be confident something did not happen
pub(crate) const QUIET: Duration = Duration::from_millis(100);

pub(crate) fn url_for(idx: usize) -> Url {
    Url::parse(&format!("https://images.example.com/{idx}.png")).unwrap()
}

pub(crate) fn photo(idx: usize) -> Photo {
    Photo::new(format!("photo-{idx}"), url_for(idx))
}

pub(crate) fn store_of(rows: usize) -> RecordStore {
    RecordStore::new((0..rows).map(photo).collect())
}

pub(crate) fn rows(ids: &[usize]) -> Vec<RowId> {
    ids.iter().copied().map(RowId).collect()
}

/// Fetcher returning `payload-<url>` bytes, optionally held behind a gate.
///
/// Every call reports its URL on the `started` channel before waiting.
pub(crate) struct FakeFetcher {
    gate: Option<Arc<Semaphore>>,
    failing: HashSet<Url>,
    empty: HashSet<Url>,
    calls: AtomicUsize,
    started: mpsc::UnboundedSender<Url>,
}

/// Test-side controls for a [`FakeFetcher`]
pub(crate) struct FetchControl {
    gate: Option<Arc<Semaphore>>,
    started: mpsc::UnboundedReceiver<Url>,
}

impl FetchControl {
    /// Let `n` gated fetches return
    pub(crate) fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Wait for the next fetch to begin
    pub(crate) async fn next_started(&mut self) -> Url {
        tokio::time::timeout(WAIT, self.started.recv())
            .await
            .expect("timed out waiting for a fetch to start")
            .expect("fetcher dropped")
    }

    /// Assert no fetch begins within the quiet period
    pub(crate) async fn assert_none_started(&mut self) {
        if let Ok(Some(url)) = tokio::time::timeout(QUIET, self.started.recv()).await {
            panic!("unexpected fetch started for {url}");
        }
    }
}

impl FakeFetcher {
    /// Fetches return immediately
    pub(crate) fn immediate() -> (Arc<Self>, FetchControl) {
        Self::build(None, HashSet::new(), HashSet::new())
    }

    /// Fetches wait until the control releases them
    pub(crate) fn gated() -> (Arc<Self>, FetchControl) {
        Self::build(
            Some(Arc::new(Semaphore::new(0))),
            HashSet::new(),
            HashSet::new(),
        )
    }

    /// Immediate fetches where the given URLs fail or return nothing
    pub(crate) fn with_failures(failing: &[Url], empty: &[Url]) -> (Arc<Self>, FetchControl) {
        Self::build(
            None,
            failing.iter().cloned().collect(),
            empty.iter().cloned().collect(),
        )
    }

    fn build(
        gate: Option<Arc<Semaphore>>,
        failing: HashSet<Url>,
        empty: HashSet<Url>,
    ) -> (Arc<Self>, FetchControl) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let fetcher = Arc::new(Self {
            gate: gate.clone(),
            failing,
            empty,
            calls: AtomicUsize::new(0),
            started: started_tx,
        });
        (
            fetcher,
            FetchControl {
                gate,
                started: started_rx,
            },
        )
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.send(url.clone()).ok();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StageError::Transport(e.to_string()))?
                .forget();
        }

        if self.failing.contains(url) {
            return Err(StageError::Transport(format!("connection refused: {url}")));
        }
        if self.empty.contains(url) {
            return Ok(Bytes::new());
        }
        Ok(Bytes::from(format!("payload-{url}")))
    }
}

/// Fetcher that panics for the given URLs and succeeds for the rest
pub(crate) struct PanickingFetcher {
    panics_on: HashSet<Url>,
}

impl PanickingFetcher {
    pub(crate) fn new(panics_on: &[Url]) -> Arc<Self> {
        Arc::new(Self {
            panics_on: panics_on.iter().cloned().collect(),
        })
    }
}

#[async_trait::async_trait]
impl ImageFetcher for PanickingFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, StageError> {
        if self.panics_on.contains(url) {
            panic!("boom: {url}");
        }
        Ok(Bytes::from(format!("payload-{url}")))
    }
}

/// Transform appending `+sepia`, failing its first `fail_first` calls
pub(crate) struct FakeTransform {
    fail_first: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeTransform {
    pub(crate) fn succeeding() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub(crate) fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageTransform for FakeTransform {
    fn apply(&self, input: &[u8], _cancel: &CancellationToken) -> Result<Bytes, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(StageError::Transform("filter unavailable".to_string()));
        }
        let mut out = input.to_vec();
        out.extend_from_slice(b"+sepia");
        Ok(Bytes::from(out))
    }
}

pub(crate) fn runner(fetcher: Arc<FakeFetcher>, transform: Arc<FakeTransform>) -> StageRunner {
    StageRunner::new(fetcher, transform)
}

/// View adapter with a settable visible set that records redraw requests
#[derive(Clone)]
pub(crate) struct RecordingView {
    visible: Arc<Mutex<Vec<RowId>>>,
    updated_tx: mpsc::UnboundedSender<RowId>,
}

/// Receiving side of a [`RecordingView`]'s redraw notifications
pub(crate) struct RedrawLog {
    updated_rx: mpsc::UnboundedReceiver<RowId>,
}

impl RecordingView {
    pub(crate) fn new(visible: &[usize]) -> (Self, RedrawLog) {
        let (updated_tx, updated_rx) = mpsc::unbounded_channel();
        (
            Self {
                visible: Arc::new(Mutex::new(rows(visible))),
                updated_tx,
            },
            RedrawLog { updated_rx },
        )
    }

    pub(crate) fn set_visible(&self, visible: &[usize]) {
        *self.visible.lock().unwrap() = rows(visible);
    }
}

impl ViewAdapter for RecordingView {
    fn visible_rows(&self) -> Vec<RowId> {
        self.visible.lock().unwrap().clone()
    }

    fn row_updated(&self, row: RowId) {
        self.updated_tx.send(row).ok();
    }
}

impl RedrawLog {
    pub(crate) async fn next(&mut self) -> RowId {
        tokio::time::timeout(WAIT, self.updated_rx.recv())
            .await
            .expect("timed out waiting for a redraw")
            .expect("view dropped")
    }

    pub(crate) async fn assert_quiet(&mut self) {
        if let Ok(Some(row)) = tokio::time::timeout(QUIET, self.updated_rx.recv()).await {
            panic!("unexpected redraw for row {row}");
        }
    }
}
