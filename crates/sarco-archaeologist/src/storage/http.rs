//! HTTP gateway payload store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sarco_types::PayloadLocator;
use tracing::debug;

use crate::clients::PayloadStore;
use crate::config::StorageConfig;
use crate::error::{ArchaeologistError, Result};

/// Fetches payloads from a content gateway with `GET {gateway}/{content_id}`.
#[derive(Debug, Clone)]
pub struct HttpPayloadStore {
    client: Client,
    gateway_url: String,
}

impl HttpPayloadStore {
    pub fn new(gateway_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArchaeologistError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(
            config.gateway_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn url_for(&self, locator: &PayloadLocator) -> String {
        format!("{}/{}", self.gateway_url, locator.content_id())
    }
}

#[async_trait]
impl PayloadStore for HttpPayloadStore {
    async fn fetch(&self, locator: &PayloadLocator) -> Result<Vec<u8>> {
        if locator.is_empty() {
            return Err(ArchaeologistError::consistency("empty payload locator"));
        }

        let url = self.url_for(locator);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArchaeologistError::Storage(format!("GET {}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ArchaeologistError::Storage(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ArchaeologistError::Storage(format!("GET {}: {}", url, e)))?;
        debug!(url = %url, bytes = bytes.len(), "Fetched payload");
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_strips_scheme() {
        let store = HttpPayloadStore::new("https://arweave.net/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.url_for(&PayloadLocator::new("arweave://abc123")),
            "https://arweave.net/abc123"
        );
        assert_eq!(
            store.url_for(&PayloadLocator::new("abc123")),
            "https://arweave.net/abc123"
        );
    }

    #[tokio::test]
    async fn test_empty_locator_is_rejected() {
        let store = HttpPayloadStore::from_config(&StorageConfig::default()).unwrap();
        let err = store.fetch(&PayloadLocator::empty()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
