use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, error::DisplayErrorContext, primitives::ByteStream as S3ByteStream};
use bytes::BytesMut;
use futures::StreamExt;
use url::Url;

use super::{ObjectStore, PutObjectRequest, PutObjectResponse, Result, StorageError};

/// S3-compatible storage backend
///
/// Uploads are capped well below S3's single-request limit, so the content is buffered and sent
/// with a single `PutObject` call.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the standard AWS environment, with optional overrides for
    /// S3-compatible providers
    pub async fn from_env(bucket: String, region: Option<String>, endpoint_url: Option<&Url>, force_path_style: bool) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config).force_path_style(force_path_style);
        if let Some(endpoint_url) = endpoint_url {
            builder = builder.endpoint_url(endpoint_url.as_str());
        }

        Self::new(Client::from_conf(builder.build()), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, mut request: PutObjectRequest<'_>) -> Result<PutObjectResponse> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = request.content.next().await {
            buffer.extend_from_slice(&chunk.map_err(StorageError::Content)?);
        }
        let content = buffer.freeze();
        let bytes_written = content.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(request.key)
            .content_type(request.content_type)
            .content_length(bytes_written as i64)
            .body(S3ByteStream::from(content))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload of '{}' failed: {}", request.key, DisplayErrorContext(&e)))?;

        tracing::debug!(bucket = %self.bucket, key = %request.key, bytes_written, "Stored object in bucket");

        Ok(PutObjectResponse { bytes_written })
    }
}
