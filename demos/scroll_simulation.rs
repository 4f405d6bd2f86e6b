//! Scroll simulation
//!
//! Drives the tracker the way a list view would:
//! - Loading a photo catalog into a record store
//! - Showing the first screen of rows
//! - Dragging, coasting and settling further down the list
//! - Re-rendering updated rows so downloaded photos get their sepia pass
//!
//! By default images are synthesized locally so the demo runs offline. Pass
//! `--network` to fetch the catalog URLs over HTTP instead.
//!
//! ```bash
//! RUST_LOG=row_pipeline=debug cargo run --example scroll_simulation -- demos/photos.json
//! ```

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use row_pipeline::{
    Config, Event, ImageFetcher, OperationTracker, PhotoState, RecordStore, RowId, SepiaTransform,
    StageError, StageRunner, TrackerHandle, ViewAdapter, load_catalog,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Rows that fit on one screen
const SCREEN_ROWS: usize = 6;

/// A list view that shows a window of rows and queues redraws
struct SimulatedList {
    first_visible: Mutex<usize>,
    row_count: usize,
    redraws: mpsc::UnboundedSender<RowId>,
}

impl SimulatedList {
    fn scroll_to(&self, first: usize) {
        if let Ok(mut current) = self.first_visible.lock() {
            *current = first.min(self.row_count.saturating_sub(SCREEN_ROWS));
        }
    }
}

impl ViewAdapter for SimulatedList {
    fn visible_rows(&self) -> Vec<RowId> {
        let first = self.first_visible.lock().map(|f| *f).unwrap_or(0);
        (first..(first + SCREEN_ROWS).min(self.row_count))
            .map(RowId)
            .collect()
    }

    fn row_updated(&self, row: RowId) {
        self.redraws.send(row).ok();
    }
}

/// Fetcher that paints a small gradient instead of hitting the network
struct SyntheticFetcher;

#[async_trait]
impl ImageFetcher for SyntheticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes, StageError> {
        let seed = url.path().bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        let img = RgbaImage::from_fn(32, 32, |x, y| {
            Rgba([seed.wrapping_add(x as u8 * 8), y as u8 * 8, 200, 255])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| StageError::Transport(e.to_string()))?;
        Ok(Bytes::from(out.into_inner()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "row_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let network = args.iter().any(|a| a == "--network");
    let catalog_path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "demos/photos.json".to_string());

    let mut config = Config::default();
    config.queues.fetch_concurrency = 3;
    config.fetch.simulated_latency = Some(Duration::from_millis(150));

    let store = RecordStore::from_catalog(load_catalog(&catalog_path));
    let row_count = store.len();
    println!("Loaded {row_count} photos from {catalog_path}");

    let runner = if network {
        StageRunner::from_config(&config)?
    } else {
        StageRunner::new(
            Arc::new(SyntheticFetcher),
            Arc::new(SepiaTransform::new(config.sepia.intensity)),
        )
        .with_simulated_latency(config.fetch.simulated_latency)
    };

    let (redraw_tx, mut redraw_rx) = mpsc::unbounded_channel();
    let list = Arc::new(SimulatedList {
        first_visible: Mutex::new(0),
        row_count,
        redraws: redraw_tx,
    });
    let tracker = OperationTracker::spawn(store, runner, list.clone(), &config)?;

    let mut events = tracker.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StageStarted { row, stage, task } => {
                    println!("  start   row {row:>2} {stage:?} (task {task})");
                }
                Event::StageCancelled { row, stage, .. } => {
                    println!("  cancel  row {row:>2} {stage:?}");
                }
                Event::QueuesSuspended => println!("  -- queues suspended --"),
                Event::QueuesResumed => println!("  -- queues resumed --"),
                Event::Shutdown => break,
                Event::RowUpdated { .. } => {}
            }
        }
    });

    // Re-render updated rows: a row that finished fetching starts its transform
    let renderer = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            while let Some(row) = redraw_rx.recv().await {
                if let Ok(Some(photo)) = tracker.record(row).await {
                    println!("  redraw  row {row:>2} {:<8} {:?}", photo.name, photo.state);
                    if photo.state == PhotoState::Downloaded
                        && tracker.row_became_visible(row).is_err()
                    {
                        break;
                    }
                }
            }
        })
    };

    println!("Showing the first screen");
    tracker.visible_set_changed(list.visible_rows())?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!("Dragging down the list");
    tracker.drag_began()?;
    for first in [2, 5, 8] {
        list.scroll_to(first);
        for row in list.visible_rows() {
            tracker.row_became_visible(row)?;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tracker.drag_ended(true)?;

    println!("Coasting");
    list.scroll_to(12);
    tokio::time::sleep(Duration::from_millis(200)).await;
    tracker.deceleration_ended()?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    print_summary(&tracker, row_count).await?;

    tracker.shutdown().await?;
    renderer.abort();
    Ok(())
}

async fn print_summary(tracker: &TrackerHandle, row_count: usize) -> row_pipeline::Result<()> {
    println!("Final states:");
    for idx in 0..row_count {
        if let Some(photo) = tracker.record(RowId(idx)).await? {
            println!("  row {idx:>2} {:<8} {:?}", photo.name, photo.state);
        }
    }
    for status in tracker.queue_status().await? {
        println!(
            "  {} queue: {} pending, {} tracked",
            status.stage.queue_name(),
            status.pending,
            status.tracked
        );
    }
    Ok(())
}
