//! HTTP image fetcher.

use bytes::Bytes;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result, StageError};

use super::ImageFetcher;

/// Production [`ImageFetcher`] backed by a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the configured timeout and user agent
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> std::result::Result<Bytes, StageError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("timeout fetching '{}'", url)
            } else if e.is_connect() {
                format!("connection failed for '{}': {}", url, e)
            } else {
                format!("failed to fetch '{}': {}", url, e)
            };
            StageError::Transport(message)
        })?;

        if !response.status().is_success() {
            return Err(StageError::Transport(format!(
                "HTTP {} fetching '{}'",
                response.status(),
                url
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            StageError::Transport(format!("failed to read body from '{}': {}", url, e))
        })?;

        tracing::debug!(url = %url, bytes = body.len(), "Fetched image");
        Ok(body)
    }
}
