//! Upload service: the collaborator the `/uploads` route delegates to.
//!
//! The route only knows the [`UploadService`] trait. It hands over a file name, the declared
//! content type and a byte stream, and gets back either an [`UploadedFile`] or an
//! [`UploadError`] whose variant says what kind of failure occurred.
//!
//! [`ImageUploader`] is the production implementation: it checks the declared content type
//! against an allow-list and streams accepted content into an [`ObjectStore`].

pub mod limited;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;
use uuid::Uuid;

use crate::config::ImagesConfig;
use crate::storage::{ObjectStore, PutObjectRequest, StorageError};
use limited::ByteStream;

/// Message reported when the declared content type is not accepted.
pub const INVALID_FILE_FORMAT_MESSAGE: &str = "Invalid file format.";

/// One file handed to the upload service
pub struct UploadRequest<'a> {
    pub file_name: String,
    pub content_type: String,
    pub content: ByteStream<'a>,
}

/// A stored upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Object key inside the store
    pub key: String,
    /// Public URL of the object
    pub url: String,
    /// Bytes stored
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The file is not in an accepted format; the message is shown to the client verbatim
    #[error("{message}")]
    InvalidFileFormat { message: String },

    /// The content stream failed while being read
    #[error("Failed to read upload content: {0}")]
    Stream(#[source] std::io::Error),

    /// The storage backend failed
    #[error("Failed to store upload: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Content(e) => UploadError::Stream(e),
            other => UploadError::Storage(other),
        }
    }
}

#[async_trait]
pub trait UploadService: Send + Sync {
    async fn upload(&self, request: UploadRequest<'_>) -> Result<UploadedFile, UploadError>;
}

/// Validates image uploads and writes them to an object store
pub struct ImageUploader {
    store: Arc<dyn ObjectStore>,
    allowed_content_types: Vec<String>,
    key_prefix: String,
    public_url: Url,
}

impl ImageUploader {
    pub fn new(store: Arc<dyn ObjectStore>, images: &ImagesConfig, public_url: Url) -> Self {
        Self {
            store,
            allowed_content_types: images.allowed_content_types.iter().map(|t| t.to_ascii_lowercase()).collect(),
            key_prefix: images.key_prefix.trim_matches('/').to_string(),
            public_url,
        }
    }

    /// Whether the declared content type (parameters ignored) is on the allow-list
    pub fn accepts(&self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        self.allowed_content_types.iter().any(|allowed| *allowed == essence)
    }

    /// `{prefix}/{uuid}-{sanitized name}`
    pub fn object_key(&self, file_name: &str) -> String {
        let name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(file_name));
        if self.key_prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.key_prefix, name)
        }
    }

    pub fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.as_str().trim_end_matches('/'), key)
    }
}

#[async_trait]
impl UploadService for ImageUploader {
    #[instrument(skip_all, fields(file_name = %request.file_name, content_type = %request.content_type))]
    async fn upload(&self, request: UploadRequest<'_>) -> Result<UploadedFile, UploadError> {
        if !self.accepts(&request.content_type) {
            return Err(UploadError::InvalidFileFormat {
                message: INVALID_FILE_FORMAT_MESSAGE.to_string(),
            });
        }

        let key = self.object_key(&request.file_name);
        let stored = self
            .store
            .put(PutObjectRequest {
                key: &key,
                content_type: &request.content_type,
                content: request.content,
            })
            .await?;

        info!(key = %key, bytes = stored.bytes_written, "Stored upload");

        Ok(UploadedFile {
            url: self.public_url_for(&key),
            key,
            size: stored.bytes_written,
        })
    }
}

/// Keep ASCII alphanumerics, `.`, `-` and `_`; replace everything else with `_`
pub fn sanitize_file_name(file_name: &str) -> String {
    // Browsers on some platforms send the full client path
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}
