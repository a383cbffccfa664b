//! Object storage backends for uploaded content.
//!
//! - [`local::LocalObjectStore`]: files in a directory, optionally served back at `/files`
//! - [`s3::S3ObjectStore`]: any S3-compatible bucket
//! - [`memory::MemoryObjectStore`]: process memory, for development and tests

pub mod local;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::StorageConfig;
use crate::upload::limited::ByteStream;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The content stream itself failed while being read
    #[error("Failed to read upload content: {0}")]
    Content(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Request to store an object
pub struct PutObjectRequest<'a> {
    pub key: &'a str,
    pub content_type: &'a str,
    pub content: ByteStream<'a>,
}

/// Response from storing an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectResponse {
    pub bytes_written: u64,
}

/// Trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Consume the content stream and store it under `key`
    async fn put(&self, request: PutObjectRequest<'_>) -> Result<PutObjectResponse>;
}

/// Build the configured storage backend
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::Local { path, .. } => {
            info!("Storing uploads on local filesystem at {}", path.display());
            tokio::fs::create_dir_all(path).await?;
            Arc::new(LocalObjectStore::new(path.clone()))
        }
        StorageConfig::S3 {
            bucket,
            region,
            endpoint_url,
            force_path_style,
            ..
        } => {
            info!(bucket = %bucket, "Storing uploads in S3-compatible bucket");
            Arc::new(S3ObjectStore::from_env(bucket.clone(), region.clone(), endpoint_url.as_ref(), *force_path_style).await)
        }
        StorageConfig::Memory { .. } => {
            info!("Storing uploads in memory (contents are lost on restart)");
            Arc::new(MemoryObjectStore::new())
        }
    };

    Ok(store)
}
