//! Bounded-concurrency stage queue for one pipeline stage.
//!
//! Submitted jobs wait in a FIFO until the dispatcher hands them a permit from
//! the concurrency limiter. Suspension holds back jobs that have not started;
//! jobs already running are never interrupted by it. Every job produces exactly
//! one [`Completion`] on the shared completion channel, including jobs
//! cancelled before they ever ran.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify, Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::pipeline::StageRunner;
use crate::store::Photo;
use crate::types::{Outcome, RowId, StageKind, TaskId};

/// Dispatcher state shared between the queue and its dispatcher task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DispatchState {
    Running,
    Suspended,
    Closed,
}

/// Handle to a submitted stage task, used to cancel it
#[derive(Clone, Debug)]
pub struct TaskHandle {
    /// Unique task id
    pub task: TaskId,
    /// Row the task works on
    pub row: RowId,
    /// Stage the task runs
    pub stage: StageKind,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Terminal report for one task, delivered exactly once
#[derive(Clone, Debug)]
pub struct Completion {
    /// Task that finished
    pub task: TaskId,
    /// Row the task worked on
    pub row: RowId,
    /// Stage the task ran
    pub stage: StageKind,
    /// What happened
    pub outcome: Outcome,
}

/// A job waiting for dispatch
struct StageJob {
    task: TaskId,
    row: RowId,
    photo: Photo,
    cancel: CancellationToken,
}

impl StageJob {
    fn completion(&self, stage: StageKind, outcome: Outcome) -> Completion {
        Completion {
            task: self.task,
            row: self.row,
            stage,
            outcome,
        }
    }
}

/// Bounded-concurrency execution pool for one stage
#[derive(Clone)]
pub struct StageQueue {
    stage: StageKind,
    /// Jobs not yet handed to the runner, in submission order
    pending: Arc<Mutex<VecDeque<StageJob>>>,
    /// Semaphore to limit concurrently running jobs
    concurrent_limit: Arc<Semaphore>,
    state: Arc<watch::Sender<DispatchState>>,
    /// Wakes the dispatcher when a job is submitted or the queue closes
    wakeup: Arc<Notify>,
    runner: StageRunner,
    completions: mpsc::UnboundedSender<Completion>,
    /// Task id source, shared across queues so ids are globally unique
    task_ids: Arc<AtomicU64>,
}

impl StageQueue {
    /// Create a queue; call [`start_dispatcher`](Self::start_dispatcher) to begin running jobs
    pub fn new(
        stage: StageKind,
        concurrency: usize,
        runner: StageRunner,
        completions: mpsc::UnboundedSender<Completion>,
        task_ids: Arc<AtomicU64>,
    ) -> Self {
        let (state, _rx) = watch::channel(DispatchState::Running);
        Self {
            stage,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            concurrent_limit: Arc::new(Semaphore::new(concurrency.max(1))),
            state: Arc::new(state),
            wakeup: Arc::new(Notify::new()),
            runner,
            completions,
            task_ids,
        }
    }

    /// Stage this queue runs
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Queue a job for `row` against a snapshot of its record
    pub async fn submit(&self, row: RowId, photo: Photo) -> TaskHandle {
        let task = TaskId(self.task_ids.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();

        if *self.state.borrow() == DispatchState::Closed {
            // Nothing will ever dispatch it; acknowledge right away
            self.completions
                .send(Completion {
                    task,
                    row,
                    stage: self.stage,
                    outcome: Outcome::Cancelled,
                })
                .ok();
            cancel.cancel();
        } else {
            let mut pending = self.pending.lock().await;
            pending.push_back(StageJob {
                task,
                row,
                photo,
                cancel: cancel.clone(),
            });
            tracing::debug!(
                queue = self.stage.queue_name(),
                row = row.0,
                task_id = task.0,
                pending = pending.len(),
                "Task submitted"
            );
            drop(pending);
            self.wakeup.notify_one();
        }

        TaskHandle {
            task,
            row,
            stage: self.stage,
            cancel,
        }
    }

    /// Request cancellation of a task
    ///
    /// A job still waiting for dispatch is removed and acknowledged immediately.
    /// A running job has its token cancelled; the runner acknowledges it at its
    /// next check point. Returns true if the job was still pending.
    pub async fn cancel(&self, handle: &TaskHandle) -> bool {
        handle.cancel.cancel();

        let removed = {
            let mut pending = self.pending.lock().await;
            pending
                .iter()
                .position(|job| job.task == handle.task)
                .and_then(|idx| pending.remove(idx))
        };

        match removed {
            Some(job) => {
                tracing::debug!(
                    queue = self.stage.queue_name(),
                    row = job.row.0,
                    task_id = job.task.0,
                    "Cancelled pending task"
                );
                self.completions
                    .send(job.completion(self.stage, Outcome::Cancelled))
                    .ok();
                true
            }
            None => {
                tracing::debug!(
                    queue = self.stage.queue_name(),
                    row = handle.row.0,
                    task_id = handle.task.0,
                    "Signalled cancellation to running task"
                );
                false
            }
        }
    }

    /// Stop dispatching jobs that have not started
    pub fn suspend(&self) {
        self.state.send_if_modified(|state| {
            if *state == DispatchState::Running {
                *state = DispatchState::Suspended;
                true
            } else {
                false
            }
        });
    }

    /// Resume dispatching
    pub fn resume(&self) {
        self.state.send_if_modified(|state| {
            if *state == DispatchState::Suspended {
                *state = DispatchState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Whether dispatch is currently suspended
    pub fn is_suspended(&self) -> bool {
        *self.state.borrow() == DispatchState::Suspended
    }

    /// Number of jobs waiting for dispatch
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Stop the dispatcher and acknowledge every pending job as cancelled
    ///
    /// Running jobs are not touched; cancel their handles to stop them.
    pub async fn close(&self) {
        self.state.send_replace(DispatchState::Closed);
        self.concurrent_limit.close();
        self.wakeup.notify_one();

        let drained: Vec<StageJob> = self.pending.lock().await.drain(..).collect();
        for job in drained {
            job.cancel.cancel();
            self.completions
                .send(job.completion(self.stage, Outcome::Cancelled))
                .ok();
        }
    }

    /// Start the dispatcher task
    ///
    /// The dispatcher repeatedly:
    /// 1. Waits while the queue is suspended
    /// 2. Takes the oldest pending job (or sleeps until one is submitted)
    /// 3. Acquires a permit from the concurrency limiter
    /// 4. Spawns the stage runner for the job, holding the permit until it finishes
    pub fn start_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        let mut state_rx = self.state.subscribe();

        tokio::spawn(async move {
            let queue_name = queue.stage.queue_name();
            loop {
                let state = match state_rx
                    .wait_for(|state| *state != DispatchState::Suspended)
                    .await
                {
                    Ok(state) => *state,
                    Err(_) => break,
                };
                if state == DispatchState::Closed {
                    break;
                }

                let next = queue.pending.lock().await.pop_front();
                let Some(job) = next else {
                    queue.wakeup.notified().await;
                    continue;
                };

                // Acquire a permit (blocks if at the concurrency bound)
                let permit = match queue.concurrent_limit.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Limiter closed: the queue is shutting down
                        job.cancel.cancel();
                        queue
                            .completions
                            .send(job.completion(queue.stage, Outcome::Cancelled))
                            .ok();
                        break;
                    }
                };

                // Suspension may have been requested while waiting for a slot
                let current = *state_rx.borrow();
                match current {
                    DispatchState::Suspended => {
                        queue.pending.lock().await.push_front(job);
                        drop(permit);
                        continue;
                    }
                    DispatchState::Closed => {
                        job.cancel.cancel();
                        queue
                            .completions
                            .send(job.completion(queue.stage, Outcome::Cancelled))
                            .ok();
                        break;
                    }
                    DispatchState::Running => {}
                }

                if job.cancel.is_cancelled() {
                    queue
                        .completions
                        .send(job.completion(queue.stage, Outcome::Cancelled))
                        .ok();
                    continue;
                }

                tracing::debug!(
                    queue = queue_name,
                    row = job.row.0,
                    task_id = job.task.0,
                    "Dispatching task"
                );

                let runner = queue.runner.clone();
                let completions = queue.completions.clone();
                let stage = queue.stage;
                tokio::spawn(async move {
                    let _permit = permit;
                    let StageJob {
                        task,
                        row,
                        photo,
                        cancel,
                    } = job;

                    // The runner gets its own task so a panicking fetcher or
                    // transform still produces a completion
                    let run =
                        tokio::spawn(async move { runner.run(&photo, stage, &cancel).await });
                    let outcome = match run.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(
                                queue = stage.queue_name(),
                                row = row.0,
                                task_id = task.0,
                                error = %e,
                                "Stage task panicked"
                            );
                            panicked_outcome(stage, &e)
                        }
                    };

                    tracing::debug!(
                        queue = stage.queue_name(),
                        row = row.0,
                        task_id = task.0,
                        outcome = outcome.label(),
                        "Task finished"
                    );
                    completions
                        .send(Completion {
                            task,
                            row,
                            stage,
                            outcome,
                        })
                        .ok();
                });
            }

            // A job pushed back while close() was draining would otherwise never complete
            let leftovers: Vec<StageJob> = queue.pending.lock().await.drain(..).collect();
            for job in leftovers {
                job.cancel.cancel();
                queue
                    .completions
                    .send(job.completion(queue.stage, Outcome::Cancelled))
                    .ok();
            }
            tracing::debug!(queue = queue_name, "Dispatcher stopped");
        })
    }
}

/// Outcome reported for a stage task that panicked or was aborted
fn panicked_outcome(stage: StageKind, error: &tokio::task::JoinError) -> Outcome {
    match stage {
        StageKind::Fetch => {
            Outcome::Failed(StageError::Transport(format!("fetch task panicked: {error}")))
        }
        StageKind::Transform => {
            Outcome::Unchanged(StageError::Transform(format!("transform task panicked: {error}")))
        }
    }
}
