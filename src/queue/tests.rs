use super::*;
use crate::test_helpers::{
    FakeFetcher, FakeTransform, PanickingFetcher, WAIT, photo, runner, url_for,
};
use std::collections::HashSet;

struct Harness {
    queue: StageQueue,
    completions: mpsc::UnboundedReceiver<Completion>,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn fetch_queue(concurrency: usize, fetcher: Arc<FakeFetcher>) -> Self {
        Self::with_runner(concurrency, runner(fetcher, FakeTransform::succeeding()))
    }

    fn with_runner(concurrency: usize, runner: StageRunner) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = StageQueue::new(
            StageKind::Fetch,
            concurrency,
            runner,
            tx,
            Arc::new(AtomicU64::new(1)),
        );
        let dispatcher = queue.start_dispatcher();
        Self {
            queue,
            completions: rx,
            dispatcher,
        }
    }

    async fn next_completion(&mut self) -> Completion {
        tokio::time::timeout(WAIT, self.completions.recv())
            .await
            .expect("timed out waiting for a completion")
            .expect("completion channel closed")
    }

    async fn assert_no_completion(&mut self) {
        if let Ok(Some(c)) =
            tokio::time::timeout(crate::test_helpers::QUIET, self.completions.recv()).await
        {
            panic!("unexpected completion for row {} ({:?})", c.row, c.outcome);
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

// -----------------------------------------------------------------------
// dispatch and concurrency
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runs_submitted_task_and_reports_completion() {
    let (fetcher, _control) = FakeFetcher::immediate();
    let mut h = Harness::fetch_queue(2, fetcher);

    let handle = h.queue.submit(RowId(4), photo(4)).await;
    let completion = h.next_completion().await;

    assert_eq!(completion.task, handle.task);
    assert_eq!(completion.row, RowId(4));
    assert_eq!(completion.stage, StageKind::Fetch);
    assert!(matches!(completion.outcome, Outcome::Downloaded(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn respects_concurrency_bound() {
    let (fetcher, mut control) = FakeFetcher::gated();
    let mut h = Harness::fetch_queue(2, fetcher);

    for idx in 0..3 {
        h.queue.submit(RowId(idx), photo(idx)).await;
    }

    // Two slots: rows 0 and 1 start, row 2 waits
    let first = control.next_started().await;
    let second = control.next_started().await;
    assert_eq!(
        HashSet::from([first, second]),
        HashSet::from([url_for(0), url_for(1)])
    );
    control.assert_none_started().await;

    // Finishing one frees a slot for the third
    control.release(1);
    h.next_completion().await;
    assert_eq!(control.next_started().await, url_for(2));

    control.release(2);
    h.next_completion().await;
    h.next_completion().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatches_in_submission_order() {
    let (fetcher, mut control) = FakeFetcher::gated();
    let h = Harness::fetch_queue(1, fetcher);

    for idx in [5, 3, 9] {
        h.queue.submit(RowId(idx), photo(idx)).await;
    }

    for idx in [5, 3, 9] {
        assert_eq!(control.next_started().await, url_for(idx));
        control.release(1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_task_completes_exactly_once() {
    let (fetcher, _control) = FakeFetcher::immediate();
    let mut h = Harness::fetch_queue(3, fetcher);

    let mut submitted = HashSet::new();
    for idx in 0..10 {
        submitted.insert(h.queue.submit(RowId(idx), photo(idx)).await.task);
    }

    let mut completed = HashSet::new();
    for _ in 0..10 {
        let completion = h.next_completion().await;
        assert!(
            completed.insert(completion.task),
            "task {} completed twice",
            completion.task
        );
    }
    assert_eq!(submitted, completed);
    h.assert_no_completion().await;
}

// -----------------------------------------------------------------------
// suspension
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suspension_defers_new_starts() {
    let (fetcher, mut control) = FakeFetcher::immediate();
    let mut h = Harness::fetch_queue(2, fetcher);

    h.queue.suspend();
    assert!(h.queue.is_suspended());
    h.queue.submit(RowId(1), photo(1)).await;

    control.assert_none_started().await;
    assert_eq!(h.queue.pending_len().await, 1);

    h.queue.resume();
    assert!(!h.queue.is_suspended());
    assert_eq!(control.next_started().await, url_for(1));
    assert!(matches!(
        h.next_completion().await.outcome,
        Outcome::Downloaded(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suspension_does_not_stop_running_task() {
    let (fetcher, mut control) = FakeFetcher::gated();
    let mut h = Harness::fetch_queue(2, fetcher);

    h.queue.submit(RowId(1), photo(1)).await;
    control.next_started().await;

    h.queue.suspend();
    control.release(1);

    let completion = h.next_completion().await;
    assert_eq!(completion.row, RowId(1));
    assert!(matches!(completion.outcome, Outcome::Downloaded(_)));
}

// -----------------------------------------------------------------------
// cancellation
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_pending_task_acknowledges_immediately() {
    let (fetcher, _control) = FakeFetcher::immediate();
    let mut h = Harness::fetch_queue(2, fetcher.clone());

    h.queue.suspend();
    let handle = h.queue.submit(RowId(7), photo(7)).await;

    assert!(h.queue.cancel(&handle).await);
    assert!(handle.is_cancelled());

    let completion = h.next_completion().await;
    assert_eq!(completion.task, handle.task);
    assert_eq!(completion.outcome, Outcome::Cancelled);

    h.queue.resume();
    h.assert_no_completion().await;
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_running_task_reports_cancelled() {
    let (fetcher, mut control) = FakeFetcher::gated();
    let mut h = Harness::fetch_queue(2, fetcher);

    let handle = h.queue.submit(RowId(2), photo(2)).await;
    control.next_started().await;

    assert!(!h.queue.cancel(&handle).await);

    let completion = h.next_completion().await;
    assert_eq!(completion.task, handle.task);
    assert_eq!(completion.outcome, Outcome::Cancelled);
    h.assert_no_completion().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_task_frees_its_slot() {
    let (fetcher, mut control) = FakeFetcher::gated();
    let mut h = Harness::fetch_queue(1, fetcher);

    let first = h.queue.submit(RowId(0), photo(0)).await;
    h.queue.submit(RowId(1), photo(1)).await;
    assert_eq!(control.next_started().await, url_for(0));

    h.queue.cancel(&first).await;
    assert_eq!(h.next_completion().await.outcome, Outcome::Cancelled);

    assert_eq!(control.next_started().await, url_for(1));
    control.release(1);
}

// -----------------------------------------------------------------------
// panics
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_fetch_reports_failure_and_frees_its_slot() {
    let runner = StageRunner::new(
        PanickingFetcher::new(&[url_for(0)]),
        FakeTransform::succeeding(),
    );
    let mut h = Harness::with_runner(1, runner);

    let first = h.queue.submit(RowId(0), photo(0)).await;
    let second = h.queue.submit(RowId(1), photo(1)).await;

    let completion = h.next_completion().await;
    assert_eq!(completion.task, first.task);
    assert_eq!(completion.row, RowId(0));
    match completion.outcome {
        Outcome::Failed(StageError::Transport(message)) => {
            assert!(message.contains("panicked"), "{message}");
        }
        other => panic!("expected a transport failure, got {other:?}"),
    }

    // Single slot: the next job only runs if the panicked task released it
    let completion = h.next_completion().await;
    assert_eq!(completion.task, second.task);
    assert!(matches!(completion.outcome, Outcome::Downloaded(_)));
}

// -----------------------------------------------------------------------
// close
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_acknowledges_pending_and_rejects_new_work() {
    let (fetcher, _control) = FakeFetcher::immediate();
    let mut h = Harness::fetch_queue(1, fetcher.clone());

    h.queue.suspend();
    h.queue.submit(RowId(1), photo(1)).await;
    h.queue.submit(RowId(2), photo(2)).await;

    h.queue.close().await;
    assert_eq!(h.next_completion().await.outcome, Outcome::Cancelled);
    assert_eq!(h.next_completion().await.outcome, Outcome::Cancelled);

    let late = h.queue.submit(RowId(3), photo(3)).await;
    assert!(late.is_cancelled());
    let completion = h.next_completion().await;
    assert_eq!(completion.task, late.task);
    assert_eq!(completion.outcome, Outcome::Cancelled);

    tokio::time::timeout(WAIT, &mut h.dispatcher)
        .await
        .expect("dispatcher should stop after close")
        .unwrap();
    assert_eq!(fetcher.calls(), 0);
}
