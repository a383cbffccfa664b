use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::StreamExt;

use super::{ObjectStore, PutObjectRequest, PutObjectResponse, Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub content_type: String,
    pub content: Bytes,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, MemoryObject>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<MemoryObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, mut request: PutObjectRequest<'_>) -> Result<PutObjectResponse> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = request.content.next().await {
            buffer.extend_from_slice(&chunk.map_err(StorageError::Content)?);
        }

        let bytes_written = buffer.len() as u64;
        self.objects.insert(
            request.key.to_string(),
            MemoryObject {
                content_type: request.content_type.to_string(),
                content: buffer.freeze(),
            },
        );

        Ok(PutObjectResponse { bytes_written })
    }
}
