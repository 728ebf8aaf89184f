//! Object storage download client.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::AssetSource;
use crate::config::BackendConfig;
use crate::remote::{ensure_success, RemoteError, RemoteResult};

/// Reads objects from the backend's storage bucket.
#[derive(Clone)]
pub struct StorageAssetSource {
    config: BackendConfig,
    bucket: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for StorageAssetSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StorageAssetSource")
            .field("base_url", &self.config.base_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl StorageAssetSource {
    /// Builds a source for the bucket named in `config`.
    pub fn new(config: BackendConfig) -> RemoteResult<Self> {
        let bucket = config.storage_bucket.clone().ok_or_else(|| {
            RemoteError::Configuration("No storage bucket configured".to_string())
        })?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            config,
            bucket,
            client,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/storage/v1/object/{}/{encoded_key}",
            self.config.base_url,
            urlencoding::encode(&self.bucket)
        )
    }
}

#[async_trait]
impl AssetSource for StorageAssetSource {
    async fn fetch(&self, key: &str) -> RemoteResult<Option<Vec<u8>>> {
        let response = self
            .client
            .get(self.object_url(key))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer_token())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }
}
