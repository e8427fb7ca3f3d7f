use crate::config::BackendConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::path::Path;
use storyboard::{ArtifactFetcher, ArtifactRef, StoryboardError};

/// Fetches artifacts over HTTP(S), or from disk for local paths and `file://` references.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &BackendConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout() * 10)
            .build()
            .map_err(|err| ProviderError::configuration(format!("HTTP client: {err}")))?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::transport(format!(
                "Download failed: {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, reference: &ArtifactRef) -> storyboard::Result<Vec<u8>> {
        let raw = reference.as_str();
        if reference.is_remote() {
            tracing::debug!(target: "storyboard", "downloading {raw}");
            return self
                .download(raw)
                .await
                .map_err(|err| StoryboardError::persistence(raw, err));
        }
        let path = Path::new(raw.strip_prefix("file://").unwrap_or(raw));
        tokio::fs::read(path)
            .await
            .map_err(|err| StoryboardError::persistence(path, err))
    }
}
