//! Test utilities for integration testing (available with `test-utils` feature).

use async_trait::async_trait;
use axum_test::TestServer;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::config::{Config, StorageConfig};
use crate::storage::{MemoryObjectStore, StorageError};
use crate::upload::{ImageUploader, UploadError, UploadRequest, UploadService, UploadedFile};
use crate::{AppState, build_router};

/// Config for tests: default limits, objects kept in memory under `https://cdn.test`
pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        storage: StorageConfig::Memory {
            public_url: Url::parse("https://cdn.test").unwrap(),
        },
        ..Default::default()
    }
}

/// Serve the router for `config` with the given upload service
pub fn create_test_app(config: Config, uploader: Arc<dyn UploadService>) -> TestServer {
    let state = AppState::builder().config(config).uploader(uploader).build();
    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Serve the router with the real image uploader backed by an in-memory store
pub fn create_test_app_with_store(config: Config) -> (TestServer, Arc<MemoryObjectStore>) {
    let store = Arc::new(MemoryObjectStore::new());
    let uploader = Arc::new(ImageUploader::new(store.clone(), &config.images, config.storage.public_url().clone()));
    (create_test_app(config, uploader), store)
}

/// What [`MockUploader`] answers with
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed and report this URL
    Success(String),
    /// Reject with this message
    InvalidFileFormat(String),
    /// Fail as if the storage backend were down
    StorageFailure,
}

/// One call observed by [`MockUploader`]
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes_received: u64,
}

/// Scripted upload service that records what it was given
pub struct MockUploader {
    outcome: MockOutcome,
    read_content: bool,
    calls: Mutex<Vec<ReceivedUpload>>,
}

impl MockUploader {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome,
            read_content: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer without pulling anything from the content stream
    pub fn without_reading_content(mut self) -> Self {
        self.read_content = false;
        self
    }

    pub fn calls(&self) -> Vec<ReceivedUpload> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl UploadService for MockUploader {
    async fn upload(&self, mut request: UploadRequest<'_>) -> Result<UploadedFile, UploadError> {
        let mut bytes_received = 0u64;
        if self.read_content {
            while let Some(chunk) = request.content.next().await {
                bytes_received += chunk.map_err(UploadError::Stream)?.len() as u64;
            }
        }

        self.calls.lock().unwrap().push(ReceivedUpload {
            file_name: request.file_name.clone(),
            content_type: request.content_type.clone(),
            bytes_received,
        });

        match &self.outcome {
            MockOutcome::Success(url) => Ok(UploadedFile {
                key: request.file_name,
                url: url.clone(),
                size: bytes_received,
            }),
            MockOutcome::InvalidFileFormat(message) => Err(UploadError::InvalidFileFormat { message: message.clone() }),
            MockOutcome::StorageFailure => Err(UploadError::Storage(StorageError::Other(anyhow::anyhow!("bucket unavailable")))),
        }
    }
}
