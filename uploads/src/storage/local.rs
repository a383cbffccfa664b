use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ObjectStore, PutObjectRequest, PutObjectResponse, Result, StorageError};

/// Local filesystem storage backend - stores objects in a directory, keyed by relative path
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    async fn write(file: &mut fs::File, mut request: PutObjectRequest<'_>) -> Result<u64> {
        let mut written = 0u64;
        while let Some(chunk) = request.content.next().await {
            let chunk = chunk.map_err(StorageError::Content)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, request: PutObjectRequest<'_>) -> Result<PutObjectResponse> {
        let full_path = self.base_path.join(request.key);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full_path).await?;
        match Self::write(&mut file, request).await {
            Ok(bytes_written) => {
                tracing::debug!(path = %full_path.display(), bytes_written, "Wrote object to disk");
                Ok(PutObjectResponse { bytes_written })
            }
            Err(e) => {
                // Don't leave partial objects behind
                drop(file);
                if let Err(remove_err) = fs::remove_file(&full_path).await {
                    tracing::warn!(path = %full_path.display(), error = %remove_err, "Failed to remove partial object");
                }
                Err(e)
            }
        }
    }
}
