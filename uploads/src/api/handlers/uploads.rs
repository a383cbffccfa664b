//! HTTP handler for image uploads.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
};
use futures::StreamExt;

use crate::AppState;
use crate::api::models::uploads::{UploadForm, UploadResponse};
use crate::errors::{Error, ErrorResponse, Result};
use crate::upload::{UploadError, UploadRequest, limited::SizeLimitedStream};

pub const FILE_REQUIRED_MESSAGE: &str = "File is required";
pub const FILE_SIZE_LIMIT_MESSAGE: &str = "File size limit reached.";

/// Content type reported when the part does not declare one
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[utoipa::path(
    post,
    path = "/uploads",
    tag = "uploads",
    summary = "Upload an image",
    description = "Upload a single image as `multipart/form-data`. The first part carrying a filename is stored; \
        content past the configured size limit (2MB by default) causes the upload to be rejected.",
    request_body(
        content = UploadForm,
        content_type = "multipart/form-data",
        description = "Image file upload"
    ),
    responses(
        (status = 201, description = "Image uploaded", body = UploadResponse),
        (status = 400, description = "File missing, too large, or in an unsupported format", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let mut multipart = multipart.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let max_file_size = state.config.limits.max_file_size;
    let max_request_size = state.config.limits.max_request_size;

    // The first part carrying a filename is the file; plain fields before it are skipped
    let field = loop {
        match multipart.next_field().await? {
            Some(field) if field.file_name().is_some() => break Some(field),
            Some(field) => {
                tracing::trace!(field_name = ?field.name(), "Skipping non-file field");
            }
            None => break None,
        }
    };

    let Some(field) = field else {
        return Err(Error::BadRequest {
            message: FILE_REQUIRED_MESSAGE.to_string(),
        });
    };

    let file_name = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();

    tracing::info!(
        file_name = %file_name,
        content_type = %content_type,
        max_file_size = max_file_size,
        "Starting image upload"
    );

    let mut content = SizeLimitedStream::new(field.boxed(), max_file_size).with_ceiling(max_request_size);

    // The upload is attempted before the size check; the limiter only discards the excess
    let result = state
        .uploader
        .upload(UploadRequest {
            file_name,
            content_type,
            content: (&mut content).boxed(),
        })
        .await;

    // Whatever the service left unread still has to pass through the limiter
    content.drain().await;

    if content.is_truncated() {
        tracing::info!(
            bytes_read = content.bytes_read(),
            max_file_size = max_file_size,
            upload_succeeded = result.is_ok(),
            "File size limit reached, rejecting upload"
        );
        if let Ok(uploaded) = &result {
            // The cut-off content stays in the store
            tracing::debug!(key = %uploaded.key, bytes = uploaded.size, "Truncated upload left in object store");
        }
        return Err(Error::BadRequest {
            message: FILE_SIZE_LIMIT_MESSAGE.to_string(),
        });
    }

    if let Some(e) = content.take_error() {
        return Err(e.into());
    }

    match result {
        Ok(uploaded) => {
            tracing::info!(key = %uploaded.key, bytes = uploaded.size, "Image uploaded");
            Ok((StatusCode::CREATED, Json(UploadResponse { url: uploaded.url })))
        }
        Err(UploadError::InvalidFileFormat { message }) => Err(Error::BadRequest { message }),
        Err(e @ (UploadError::Stream(_) | UploadError::Storage(_))) => Err(Error::Other(anyhow::Error::new(e))),
    }
}
