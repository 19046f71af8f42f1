//! HTTP client a peer uses to talk to the coordinator.

use std::time::Duration;

use image::RgbaImage;
use reqwest::{Client, StatusCode};

use crate::compute::evolution::{Organism, Patch};

use super::SyncError;

/// Client for one coordinator endpoint.
#[derive(Debug, Clone)]
pub struct SyncClient {
    endpoint: String,
    client: Client,
}

impl SyncClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, SyncError> {
        let response = self.client.get(self.url(path)).send().await?;
        Ok(response)
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Succeeds when the coordinator is up.
    pub async fn health(&self) -> Result<(), SyncError> {
        Self::expect_success(self.get("/").await?).await?;
        Ok(())
    }

    /// The coordinator's target image.
    pub async fn target_image(&self) -> Result<RgbaImage, SyncError> {
        let response = Self::expect_success(self.get("/target").await?).await?;
        let bytes = response.bytes().await?;
        Ok(image::load_from_memory(&bytes)?.to_rgba8())
    }

    /// The coordinator's focus map, if it has one.
    pub async fn focus_image(&self) -> Result<Option<RgbaImage>, SyncError> {
        let response = self.get("/focus").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let bytes = Self::expect_success(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(image::load_from_memory(&bytes)?.to_rgba8()))
    }

    /// Full top organism.
    pub async fn top_organism(&self) -> Result<Organism, SyncError> {
        let response = Self::expect_success(self.get("/organism").await?).await?;
        let genome = response.text().await?;
        Ok(Organism::from_genome(&genome)?)
    }

    /// Hash of the top organism.
    pub async fn top_hash(&self) -> Result<String, SyncError> {
        let response = Self::expect_success(self.get("/organism?hashonly=true").await?).await?;
        Ok(response.text().await?.trim().to_string())
    }

    /// Patch from `previous` to the current top. `None` when the coordinator
    /// cannot bridge from `previous`.
    pub async fn delta(&self, previous: &str) -> Result<Option<Patch>, SyncError> {
        let response = self
            .client
            .get(self.url("/organism/delta"))
            .query(&[("previous", previous)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let patch = Self::expect_success(response).await?.json::<Patch>().await?;
        Ok(Some(patch))
    }

    /// Submit a patch for the coordinator's next generation.
    pub async fn submit_patch(&self, patch: &Patch) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.url("/organism"))
            .json(patch)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }
}
