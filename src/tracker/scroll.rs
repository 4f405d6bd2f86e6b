//! Drag and deceleration handling.
//!
//! While the user scrolls, both queues are suspended so rows flying past do
//! not start work. When scrolling settles, the tracker reconciles against the
//! rows the view reports as visible and only then resumes dispatch, so the
//! queued work for rows that scrolled away is already gone.

use crate::types::{Event, ScrollPhase};

use super::OperationTracker;

impl OperationTracker {
    pub(super) fn drag_began(&mut self) {
        self.phase = ScrollPhase::Dragging;
        self.suspend_queues();
    }

    pub(super) async fn drag_ended(&mut self, will_decelerate: bool) {
        if will_decelerate {
            // Queues stay suspended until the viewport stops coasting
            self.phase = ScrollPhase::Decelerating;
            return;
        }
        self.settle().await;
    }

    pub(super) async fn deceleration_ended(&mut self) {
        self.settle().await;
    }

    /// Reconcile against the current visible rows, then resume dispatch
    async fn settle(&mut self) {
        self.phase = ScrollPhase::Idle;
        let visible = self.view.visible_rows();
        self.reconcile(&visible).await;
        self.resume_queues();
    }

    fn suspend_queues(&self) {
        let was_running = !self.fetch_queue.is_suspended() || !self.transform_queue.is_suspended();
        self.fetch_queue.suspend();
        self.transform_queue.suspend();
        if was_running {
            tracing::debug!("Queues suspended");
            self.emit_event(Event::QueuesSuspended);
        }
    }

    fn resume_queues(&self) {
        let was_suspended = self.fetch_queue.is_suspended() || self.transform_queue.is_suspended();
        self.fetch_queue.resume();
        self.transform_queue.resume();
        if was_suspended {
            tracing::debug!("Queues resumed");
            self.emit_event(Event::QueuesResumed);
        }
    }
}
