//! Conditional asset download.
//!
//! A record may carry the content hash of a binary asset (an avatar, say).
//! `AssetSync` fetches the asset only when the local copy is missing or its
//! hash differs from the one on the record.

mod source;

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::remote::RemoteResult;

pub use source::StorageAssetSource;

/// Where asset bytes come from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the object stored under `key`, or `None` if there is none.
    async fn fetch(&self, key: &str) -> RemoteResult<Option<Vec<u8>>>;
}

/// An asset referenced from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// Object key, relative to the bucket and to the local asset directory
    pub key: String,
    /// Hex SHA-256 stored on the record, if any
    pub expected_hash: Option<String>,
}

impl AssetRef {
    pub fn new(key: impl Into<String>, expected_hash: Option<String>) -> Self {
        Self {
            key: key.into(),
            expected_hash: expected_hash.map(|hash| hash.trim().to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Local bytes already match; nothing was fetched
    UpToDate,
    Downloaded { bytes: usize },
    /// The remote has no object under this key
    NoRemoteAsset,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub struct AssetSync {
    dir: PathBuf,
    source: Arc<dyn AssetSource>,
}

impl std::fmt::Debug for AssetSync {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AssetSync")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl AssetSync {
    pub fn new(dir: impl Into<PathBuf>, source: Arc<dyn AssetSource>) -> Self {
        Self {
            dir: dir.into(),
            source,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local file for `key`. Keys may contain `/` but must stay inside the
    /// asset directory.
    pub fn local_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid asset key: {key}")));
        }
        Ok(self.dir.join(relative))
    }

    /// Hash of the local copy, or `None` when it does not exist.
    pub async fn local_hash(&self, key: &str) -> Result<Option<String>> {
        let path = self.local_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(content_hash(&bytes))),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Download `asset` unless the local copy already matches.
    ///
    /// Without an expected hash any existing local copy counts as current.
    pub async fn sync_asset(&self, asset: &AssetRef) -> Result<AssetOutcome> {
        let local = self.local_hash(&asset.key).await?;
        let current = match (&local, &asset.expected_hash) {
            (Some(local), Some(expected)) => local == expected,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if current {
            tracing::debug!(key = %asset.key, "Asset is up to date");
            return Ok(AssetOutcome::UpToDate);
        }

        let Some(bytes) = self.source.fetch(&asset.key).await? else {
            tracing::debug!(key = %asset.key, "No remote asset");
            return Ok(AssetOutcome::NoRemoteAsset);
        };
        if let Some(expected) = &asset.expected_hash {
            let actual = content_hash(&bytes);
            if &actual != expected {
                return Err(Error::Storage(format!(
                    "Downloaded asset {} has hash {actual}, expected {expected}",
                    asset.key
                )));
            }
        }

        self.write_atomically(&asset.key, &bytes).await?;
        tracing::info!(key = %asset.key, bytes = bytes.len(), "Downloaded asset");
        Ok(AssetOutcome::Downloaded { bytes: bytes.len() })
    }

    async fn write_atomically(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.local_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = path.clone().into_os_string();
        temp.push(".part");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, bytes).await?;
        if let Err(error) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::Storage(format!(
                "Failed to move asset into place at {}: {error}",
                path.display()
            )));
        }
        Ok(())
    }
}
