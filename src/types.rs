//! Core types for row-pipeline

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Stable identifier for a row (its index in the record store)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub usize);

impl RowId {
    /// Create a new RowId
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the inner index
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for RowId {
    fn from(id: usize) -> Self {
        Self(id)
    }
}

impl From<RowId> for usize {
    fn from(id: RowId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for one submitted stage task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline state of a row's photo
///
/// Advances `New -> Downloaded -> Filtered`, or to `Failed` from `New`/`Downloaded`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoState {
    /// Nothing fetched yet
    #[default]
    New,
    /// Raw image bytes are available
    Downloaded,
    /// Post-processed image bytes are available
    Filtered,
    /// Fetch failed; terminal
    Failed,
}

impl PhotoState {
    /// Terminal states never schedule more work
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhotoState::Filtered | PhotoState::Failed)
    }

    /// The stage that would advance a record in this state, if any
    pub fn next_stage(&self) -> Option<StageKind> {
        match self {
            PhotoState::New => Some(StageKind::Fetch),
            PhotoState::Downloaded => Some(StageKind::Transform),
            PhotoState::Filtered | PhotoState::Failed => None,
        }
    }
}

/// One step of the two-step pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Download the source image
    Fetch,
    /// Post-process the downloaded image
    Transform,
}

impl StageKind {
    /// Both stages, in pipeline order
    pub const ALL: [StageKind; 2] = [StageKind::Fetch, StageKind::Transform];

    /// Queue name used in logs
    pub fn queue_name(&self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::Transform => "transform",
        }
    }
}

/// Terminal result of running one stage for one record
///
/// Every stage run produces exactly one of these; errors are folded in as values.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Fetch produced a non-empty payload
    Downloaded(Bytes),
    /// Transform produced a new payload
    Filtered(Bytes),
    /// Fetch failed (transport error or empty payload); record becomes `Failed`
    Failed(StageError),
    /// Transform failed; record stays `Downloaded`
    Unchanged(StageError),
    /// Transform precondition (`Downloaded`) not met; nothing to do
    Skipped,
    /// Cancellation was observed; nothing may be written
    Cancelled,
}

impl Outcome {
    /// Whether this outcome is the cancellation acknowledgment
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Short label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Downloaded(_) => "downloaded",
            Outcome::Filtered(_) => "filtered",
            Outcome::Failed(_) => "failed",
            Outcome::Unchanged(_) => "unchanged",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Scroll interaction phase reported by the view
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPhase {
    /// Not scrolling; rows may start work as they render
    #[default]
    Idle,
    /// The user is dragging the viewport
    Dragging,
    /// The viewport is coasting after a drag
    Decelerating,
}

impl ScrollPhase {
    /// Whether the viewport is moving under the user's finger or by momentum
    pub fn is_scrolling(&self) -> bool {
        !matches!(self, ScrollPhase::Idle)
    }
}

/// Event emitted by the tracker
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A stage task was submitted for a row
    StageStarted {
        /// Row id
        row: RowId,
        /// Stage kind
        stage: StageKind,
        /// Task id
        task: TaskId,
    },

    /// A tracked stage task was cancelled because its row left the screen
    StageCancelled {
        /// Row id
        row: RowId,
        /// Stage kind
        stage: StageKind,
        /// Task id
        task: TaskId,
    },

    /// A stage finished (not cancelled) and the row should be redrawn
    RowUpdated {
        /// Row id
        row: RowId,
        /// Record state after the completion was applied
        state: PhotoState,
    },

    /// Both queues stopped dispatching new work
    QueuesSuspended,

    /// Both queues resumed dispatching
    QueuesResumed,

    /// Tracker shut down
    Shutdown,
}
