//! Starting and cancelling stage tasks.

use crate::types::{Event, RowId, StageKind};

use super::OperationTracker;
use super::reconcile::plan_reconcile;

impl OperationTracker {
    /// Start the row's next stage unless the viewport is scrolling
    pub(super) async fn row_became_visible(&mut self, row: RowId) {
        if self.phase.is_scrolling() {
            tracing::trace!(row = row.0, phase = ?self.phase, "Ignoring row while scrolling");
            return;
        }
        self.start_if_needed(row).await;
    }

    /// Submit the stage the row's state calls for, if it is not already tracked
    ///
    /// `New` rows get a fetch, `Downloaded` rows get a transform, and
    /// `Filtered` or `Failed` rows are left alone.
    pub(super) async fn start_if_needed(&mut self, row: RowId) {
        let Some(photo) = self.store.get(row) else {
            tracing::warn!(row = row.0, rows = self.store.len(), "Unknown row");
            return;
        };
        let Some(stage) = photo.state.next_stage() else {
            return;
        };
        if self.tracked.for_stage(stage).contains_key(&row) {
            tracing::trace!(row = row.0, stage = stage.queue_name(), "Already tracked");
            return;
        }

        let snapshot = photo.clone();
        let handle = self.queue(stage).submit(row, snapshot).await;
        tracing::debug!(
            row = row.0,
            stage = stage.queue_name(),
            task_id = handle.task.0,
            "Started stage"
        );
        self.emit_event(Event::StageStarted {
            row,
            stage,
            task: handle.task,
        });
        self.tracked.for_stage_mut(stage).insert(row, handle);
    }

    /// Cancel work for rows that left `visible` and start work for rows that entered it
    ///
    /// Cancelled entries are dropped from the tracked maps right away; their
    /// completions arrive later and are ignored.
    pub(super) async fn reconcile(&mut self, visible: &[RowId]) {
        let plan = plan_reconcile(&self.tracked.rows(), visible);
        if plan.is_empty() {
            return;
        }
        tracing::debug!(
            cancel = plan.to_cancel.len(),
            start = plan.to_start.len(),
            visible = visible.len(),
            "Reconciling visible rows"
        );

        for &row in &plan.to_cancel {
            self.cancel_row(row).await;
        }
        for &row in &plan.to_start {
            self.start_if_needed(row).await;
        }
    }

    /// Cancel and forget every tracked task for `row`
    pub(super) async fn cancel_row(&mut self, row: RowId) {
        for stage in StageKind::ALL {
            let Some(handle) = self.tracked.for_stage_mut(stage).remove(&row) else {
                continue;
            };
            self.queue(stage).cancel(&handle).await;
            self.emit_event(Event::StageCancelled {
                row,
                stage,
                task: handle.task,
            });
        }
    }
}
