use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for a stored upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Public URL of the stored image
    pub url: String,
}

/// Multipart form accepted by `POST /uploads` (documentation only)
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// The image. Only the first part carrying a filename is read.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}
