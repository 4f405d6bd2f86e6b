//! Operation tracker, the visibility-driven scheduler.
//!
//! The tracker is an actor: a single task owns the record store, the per-stage
//! maps of in-flight tasks, and both stage queues. Every state transition runs
//! on that task (the coordination context), so the bookkeeping never races
//! with itself even though fetches and transforms run in parallel.
//!
//! The embedding view talks to the actor through a cloneable [`TrackerHandle`]
//! and receives redraw requests through its [`ViewAdapter`] implementation.
//!
//! Split into focused submodules:
//! - [`reconcile`] - Pure cancel/start planning
//! - `scheduling` - Starting and cancelling stage tasks
//! - `scroll` - Drag and deceleration handling
//! - `completion` - Applying stage outcomes
//! - `lifecycle` - Shutdown

mod completion;
mod lifecycle;
pub mod reconcile;
mod scheduling;
mod scroll;


use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::StageRunner;
use crate::queue::{Completion, StageQueue, TaskHandle};
use crate::store::{Photo, RecordStore};
use crate::types::{Event, RowId, ScrollPhase, StageKind};

pub use reconcile::{ReconcilePlan, plan_reconcile};

/// The view layer, as seen by the tracker
///
/// Both methods are called on the coordination context and must not block.
pub trait ViewAdapter: Send + Sync + 'static {
    /// Row ids currently on screen
    fn visible_rows(&self) -> Vec<RowId>;

    /// A row's record changed (or a stage finished) and the row should be redrawn
    fn row_updated(&self, row: RowId);
}

/// Snapshot of one stage queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueStatus {
    /// Stage the queue runs
    pub stage: StageKind,
    /// Whether dispatch is suspended
    pub suspended: bool,
    /// Jobs waiting for dispatch
    pub pending: usize,
    /// Rows with a tracked task for this stage
    pub tracked: usize,
}

/// Messages processed by the coordination context
enum Command {
    RowBecameVisible(RowId),
    StartIfNeeded(RowId),
    Reconcile(Vec<RowId>),
    DragBegan,
    DragEnded { will_decelerate: bool },
    DecelerationEnded,
    Record {
        row: RowId,
        reply: oneshot::Sender<Option<Photo>>,
    },
    Tracked {
        stage: StageKind,
        reply: oneshot::Sender<Vec<RowId>>,
    },
    Phase {
        reply: oneshot::Sender<ScrollPhase>,
    },
    QueueStatus {
        reply: oneshot::Sender<Vec<QueueStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// In-flight task per row, one map per stage
#[derive(Default)]
struct TrackedTasks {
    fetch: HashMap<RowId, TaskHandle>,
    transform: HashMap<RowId, TaskHandle>,
}

impl TrackedTasks {
    fn for_stage(&self, stage: StageKind) -> &HashMap<RowId, TaskHandle> {
        match stage {
            StageKind::Fetch => &self.fetch,
            StageKind::Transform => &self.transform,
        }
    }

    fn for_stage_mut(&mut self, stage: StageKind) -> &mut HashMap<RowId, TaskHandle> {
        match stage {
            StageKind::Fetch => &mut self.fetch,
            StageKind::Transform => &mut self.transform,
        }
    }

    /// Rows with a task tracked in either stage
    fn rows(&self) -> HashSet<RowId> {
        self.fetch
            .keys()
            .chain(self.transform.keys())
            .copied()
            .collect()
    }
}

/// The scheduler actor's state (owned by the coordination task)
pub struct OperationTracker {
    store: RecordStore,
    fetch_queue: StageQueue,
    transform_queue: StageQueue,
    tracked: TrackedTasks,
    phase: ScrollPhase,
    view: Arc<dyn ViewAdapter>,
    event_tx: broadcast::Sender<Event>,
    dispatchers: Vec<tokio::task::JoinHandle<()>>,
}

impl OperationTracker {
    /// Start the tracker and both queue dispatchers on the current runtime
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration fails validation.
    pub fn spawn(
        store: RecordStore,
        runner: StageRunner,
        view: Arc<dyn ViewAdapter>,
        config: &Config,
    ) -> Result<TrackerHandle> {
        config.validate()?;

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _rx) = broadcast::channel(config.event_buffer);
        let task_ids = Arc::new(AtomicU64::new(1));

        let fetch_queue = StageQueue::new(
            StageKind::Fetch,
            config.concurrency_for(StageKind::Fetch),
            runner.clone(),
            completion_tx.clone(),
            Arc::clone(&task_ids),
        );
        let transform_queue = StageQueue::new(
            StageKind::Transform,
            config.concurrency_for(StageKind::Transform),
            runner,
            completion_tx,
            task_ids,
        );
        let dispatchers = vec![
            fetch_queue.start_dispatcher(),
            transform_queue.start_dispatcher(),
        ];

        tracing::info!(
            rows = store.len(),
            fetch_concurrency = config.queues.fetch_concurrency,
            transform_concurrency = config.queues.transform_concurrency,
            "Operation tracker started"
        );

        let tracker = Self {
            store,
            fetch_queue,
            transform_queue,
            tracked: TrackedTasks::default(),
            phase: ScrollPhase::Idle,
            view,
            event_tx: event_tx.clone(),
            dispatchers,
        };
        tokio::spawn(tracker.run(command_rx, completion_rx));

        Ok(TrackerHandle {
            commands: command_tx,
            event_tx,
        })
    }

    /// Coordination loop: completions and commands, one at a time
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(completion) = completions.recv() => {
                    self.on_completion(completion);
                }
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        reply.send(()).ok();
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        // Every handle dropped
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::RowBecameVisible(row) => self.row_became_visible(row).await,
            Command::StartIfNeeded(row) => self.start_if_needed(row).await,
            Command::Reconcile(visible) => self.reconcile(&visible).await,
            Command::DragBegan => self.drag_began(),
            Command::DragEnded { will_decelerate } => self.drag_ended(will_decelerate).await,
            Command::DecelerationEnded => self.deceleration_ended().await,
            Command::Record { row, reply } => {
                reply.send(self.store.get(row).cloned()).ok();
            }
            Command::Tracked { stage, reply } => {
                let mut rows: Vec<RowId> = self.tracked.for_stage(stage).keys().copied().collect();
                rows.sort_unstable();
                reply.send(rows).ok();
            }
            Command::Phase { reply } => {
                reply.send(self.phase).ok();
            }
            Command::QueueStatus { reply } => {
                let mut status = Vec::with_capacity(2);
                for stage in StageKind::ALL {
                    let queue = self.queue(stage);
                    status.push(QueueStatus {
                        stage,
                        suspended: queue.is_suspended(),
                        pending: queue.pending_len().await,
                        tracked: self.tracked.for_stage(stage).len(),
                    });
                }
                reply.send(status).ok();
            }
            // Handled by the run loop
            Command::Shutdown { reply } => {
                reply.send(()).ok();
            }
        }
    }

    fn queue(&self, stage: StageKind) -> &StageQueue {
        match stage {
            StageKind::Fetch => &self.fetch_queue,
            StageKind::Transform => &self.transform_queue,
        }
    }

    /// Emit an event to all subscribers (dropped if nobody listens)
    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Cloneable handle to a running tracker
///
/// Notification methods return immediately; the work happens on the
/// coordination context in the order the calls were made.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<Event>,
}

impl TrackerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ShuttingDown)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| Error::ShuttingDown)
    }

    /// A row was rendered; start its next stage unless the view is scrolling
    pub fn row_became_visible(&self, row: RowId) -> Result<()> {
        self.send(Command::RowBecameVisible(row))
    }

    /// Start the row's next stage if nothing is tracked for it, regardless of scrolling
    pub fn start_if_needed(&self, row: RowId) -> Result<()> {
        self.send(Command::StartIfNeeded(row))
    }

    /// The visible window settled on `visible`; cancel off-screen work and start on-screen work
    pub fn visible_set_changed(&self, visible: Vec<RowId>) -> Result<()> {
        self.reconcile(visible)
    }

    /// Reconcile tracked work against `visible`
    pub fn reconcile(&self, visible: Vec<RowId>) -> Result<()> {
        self.send(Command::Reconcile(visible))
    }

    /// The user started dragging; suspend both queues
    pub fn drag_began(&self) -> Result<()> {
        self.send(Command::DragBegan)
    }

    /// The user lifted their finger
    pub fn drag_ended(&self, will_decelerate: bool) -> Result<()> {
        self.send(Command::DragEnded { will_decelerate })
    }

    /// Momentum scrolling stopped
    pub fn deceleration_ended(&self) -> Result<()> {
        self.send(Command::DecelerationEnded)
    }

    /// Snapshot of a row's record
    pub async fn record(&self, row: RowId) -> Result<Option<Photo>> {
        self.request(|reply| Command::Record { row, reply }).await
    }

    /// Rows with a tracked task for `stage`, ascending
    pub async fn tracked(&self, stage: StageKind) -> Result<Vec<RowId>> {
        self.request(|reply| Command::Tracked { stage, reply }).await
    }

    /// Current scroll phase
    pub async fn scroll_phase(&self) -> Result<ScrollPhase> {
        self.request(|reply| Command::Phase { reply }).await
    }

    /// Status of both stage queues (fetch first)
    pub async fn queue_status(&self) -> Result<Vec<QueueStatus>> {
        self.request(|reply| Command::QueueStatus { reply }).await
    }

    /// Subscribe to tracker events
    ///
    /// Each subscriber receives every event emitted after it subscribed. A
    /// subscriber that falls behind by more than the configured buffer gets
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Cancel all tracked work, stop both queues and end the coordination loop
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the tracker already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
