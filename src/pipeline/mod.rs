//! Pipeline stage runner: executes one fetch or transform for one record.
//!
//! Split into focused submodules:
//! - [`http`] - Production [`ImageFetcher`] over `reqwest`
//! - [`sepia`] - Production [`ImageTransform`] applying a sepia tone
//!
//! The runner never writes to the record store. It reports an [`Outcome`] and
//! the tracker applies it on its own context.

pub mod http;
pub mod sepia;


use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Config;
use crate::error::{Result, StageError};
use crate::store::Photo;
use crate::types::{Outcome, PhotoState, StageKind};

pub use http::HttpFetcher;
pub use sepia::SepiaTransform;

/// Source of raw image bytes, enabling testability of the fetch stage.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download the image at `url`
    async fn fetch(&self, url: &Url) -> std::result::Result<Bytes, StageError>;
}

/// Post-processing step applied to downloaded bytes.
///
/// Runs on a blocking thread. Implementations may poll `cancel` between
/// expensive steps and bail out early; the runner re-checks it afterwards.
pub trait ImageTransform: Send + Sync {
    /// Produce the processed image
    fn apply(
        &self,
        input: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<Bytes, StageError>;
}

/// Executes a single pipeline stage against a record snapshot.
#[derive(Clone)]
pub struct StageRunner {
    fetcher: Arc<dyn ImageFetcher>,
    transform: Arc<dyn ImageTransform>,
    simulated_latency: Option<Duration>,
}

impl StageRunner {
    /// Create a runner from a fetcher and a transform
    pub fn new(fetcher: Arc<dyn ImageFetcher>, transform: Arc<dyn ImageTransform>) -> Self {
        Self {
            fetcher,
            transform,
            simulated_latency: None,
        }
    }

    /// Add an artificial, cancellable wait after each successful download
    #[must_use]
    pub fn with_simulated_latency(mut self, latency: Option<Duration>) -> Self {
        self.simulated_latency = latency;
        self
    }

    /// Build the production runner: HTTP fetch plus sepia transform
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.http)?;
        let transform = SepiaTransform::new(config.sepia.intensity);
        Ok(Self::new(Arc::new(fetcher), Arc::new(transform))
            .with_simulated_latency(config.fetch.simulated_latency))
    }

    /// Run `stage` for `photo`, observing `cancel` at every check point
    pub async fn run(&self, photo: &Photo, stage: StageKind, cancel: &CancellationToken) -> Outcome {
        match stage {
            StageKind::Fetch => self.run_fetch(photo, cancel).await,
            StageKind::Transform => self.run_transform(photo, cancel).await,
        }
    }

    async fn run_fetch(&self, photo: &Photo, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            result = self.fetcher.fetch(&photo.url) => result,
        };

        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let payload = match result {
            Ok(payload) if payload.is_empty() => {
                tracing::warn!(url = %photo.url, "Fetch returned an empty payload");
                return Outcome::Failed(StageError::EmptyPayload);
            }
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(url = %photo.url, error = %e, "Fetch failed");
                return Outcome::Failed(e);
            }
        };

        if let Some(latency) = self.simulated_latency {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Outcome::Cancelled,
                _ = tokio::time::sleep(latency) => {}
            }
        }

        Outcome::Downloaded(payload)
    }

    async fn run_transform(&self, photo: &Photo, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        if photo.state != PhotoState::Downloaded {
            return Outcome::Skipped;
        }

        let Some(input) = photo.image.clone() else {
            return Outcome::Unchanged(StageError::Transform(
                "downloaded record has no image".to_string(),
            ));
        };

        // Offload pixel work so runtime workers stay free for fetches
        let transform = Arc::clone(&self.transform);
        let token = cancel.clone();
        let result =
            tokio::task::spawn_blocking(move || transform.apply(&input, &token)).await;

        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        match result {
            Ok(Ok(output)) => Outcome::Filtered(output),
            Ok(Err(e)) => {
                tracing::warn!(name = %photo.name, error = %e, "Transform failed, keeping downloaded image");
                Outcome::Unchanged(e)
            }
            Err(e) => {
                tracing::warn!(name = %photo.name, error = %e, "Transform task panicked");
                Outcome::Unchanged(StageError::Transform(format!(
                    "transform task panicked: {}",
                    e
                )))
            }
        }
    }
}
