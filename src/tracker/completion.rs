//! Applying stage outcomes on the coordination context.

use std::collections::hash_map::Entry;

use crate::queue::Completion;
use crate::types::Event;

use super::OperationTracker;

impl OperationTracker {
    /// Handle one task's completion
    ///
    /// The tracked entry is dropped only when it still belongs to this task;
    /// a row that was cancelled and started again keeps its newer entry.
    /// Cancelled outcomes change nothing. Other outcomes are applied to the
    /// record (the store refuses regressions) and the row is redrawn if the
    /// task was still tracked or the record advanced.
    pub(super) fn on_completion(&mut self, completion: Completion) {
        let Completion {
            task,
            row,
            stage,
            outcome,
        } = completion;

        let was_tracked = match self.tracked.for_stage_mut(stage).entry(row) {
            Entry::Occupied(entry) if entry.get().task == task => {
                entry.remove();
                true
            }
            _ => false,
        };

        if outcome.is_cancelled() {
            tracing::trace!(
                row = row.0,
                stage = stage.queue_name(),
                task_id = task.0,
                was_tracked,
                "Cancellation acknowledged"
            );
            return;
        }

        let changed = match self.store.apply(row, &outcome) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(row = row.0, task_id = task.0, error = %e, "Completion for unknown row");
                return;
            }
        };

        tracing::debug!(
            row = row.0,
            stage = stage.queue_name(),
            task_id = task.0,
            outcome = outcome.label(),
            was_tracked,
            changed,
            "Stage completed"
        );

        if !was_tracked && !changed {
            tracing::trace!(row = row.0, task_id = task.0, "Ignoring stale completion");
            return;
        }

        let state = self
            .store
            .get(row)
            .map(|photo| photo.state)
            .unwrap_or_default();
        self.view.row_updated(row);
        self.emit_event(Event::RowUpdated { row, state });
    }
}
