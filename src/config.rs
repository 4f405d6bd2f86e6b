//! Configuration types for row-pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Stage queue concurrency settings
///
/// Each queue runs at most this many stage tasks at once. Both bounds must be
/// positive; a long visible list otherwise fans out one task per row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrent fetches (default: 4)
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Maximum concurrent transforms (default: available CPU parallelism)
    #[serde(default = "default_transform_concurrency")]
    pub transform_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            transform_concurrency: default_transform_concurrency(),
        }
    }
}

/// HTTP client settings for the production fetcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Fetch stage behavior
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Artificial wait after each successful download, in milliseconds (default: none)
    ///
    /// Useful for demos and for exercising cancellation against slow networks.
    /// The wait itself is cancellable.
    #[serde(default, with = "optional_millis_serde")]
    pub simulated_latency: Option<Duration>,
}

/// Sepia transform settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SepiaConfig {
    /// Blend factor between the original and the sepia tone, 0.0..=1.0 (default: 0.8)
    #[serde(default = "default_sepia_intensity")]
    pub intensity: f32,
}

impl Default for SepiaConfig {
    fn default() -> Self {
        Self {
            intensity: default_sepia_intensity(),
        }
    }
}

/// Main configuration for the tracker and its stage queues
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Stage queue concurrency
    #[serde(default)]
    pub queues: QueueConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Fetch stage behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Sepia transform settings
    #[serde(default)]
    pub sepia: SepiaConfig,

    /// Capacity of the event broadcast channel (default: 1024)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            http: HttpConfig::default(),
            fetch: FetchConfig::default(),
            sepia: SepiaConfig::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queues.fetch_concurrency == 0 {
            return Err(Error::config(
                "fetch_concurrency",
                "fetch_concurrency must be greater than zero",
            ));
        }
        if self.queues.transform_concurrency == 0 {
            return Err(Error::config(
                "transform_concurrency",
                "transform_concurrency must be greater than zero",
            ));
        }
        if self.event_buffer == 0 {
            return Err(Error::config(
                "event_buffer",
                "event_buffer must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.sepia.intensity) {
            return Err(Error::config(
                "intensity",
                format!(
                    "sepia intensity must be within 0.0..=1.0, got {}",
                    self.sepia.intensity
                ),
            ));
        }
        Ok(())
    }

    /// Concurrency bound for the given stage's queue
    pub fn concurrency_for(&self, stage: crate::types::StageKind) -> usize {
        match stage {
            crate::types::StageKind::Fetch => self.queues.fetch_concurrency,
            crate::types::StageKind::Transform => self.queues.transform_concurrency,
        }
    }
}

// Default value functions
fn default_fetch_concurrency() -> usize {
    4
}

fn default_transform_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("row-pipeline/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_sepia_intensity() -> f32 {
    0.8
}

fn default_event_buffer() -> usize {
    1024
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration as milliseconds
mod optional_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
