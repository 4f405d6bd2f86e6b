//! Shutdown.

use std::time::Duration;

use crate::types::Event;

use super::OperationTracker;

/// How long shutdown waits for each dispatcher to stop
const DISPATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl OperationTracker {
    /// Cancel all tracked work and stop both queues
    ///
    /// Running stage tasks are signalled but not awaited; they observe their
    /// cancellation token at the next check point and their completions are
    /// dropped with the actor.
    pub(super) async fn shutdown(&mut self) {
        tracing::info!(
            fetches = self.tracked.fetch.len(),
            transforms = self.tracked.transform.len(),
            "Shutting down operation tracker"
        );

        let mut rows: Vec<_> = self.tracked.rows().into_iter().collect();
        rows.sort_unstable();
        for row in rows {
            self.cancel_row(row).await;
        }

        self.fetch_queue.close().await;
        self.transform_queue.close().await;

        for dispatcher in std::mem::take(&mut self.dispatchers) {
            match tokio::time::timeout(DISPATCHER_STOP_TIMEOUT, dispatcher).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Dispatcher task failed"),
                Err(_) => tracing::warn!("Timed out waiting for dispatcher to stop"),
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Operation tracker stopped");
    }
}
