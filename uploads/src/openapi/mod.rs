//! OpenAPI documentation for the upload API.
//!
//! The document is served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::errors::ErrorResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Uploads API",
        description = "Image upload service. Files are sent as `multipart/form-data` and stored in the configured object store."
    ),
    paths(api::handlers::uploads::upload_image),
    components(
        schemas(
            api::models::uploads::UploadResponse,
            api::models::uploads::UploadForm,
            ErrorResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Upload images and get back their public URL.

Uploads are limited to a single file per request. Files larger than the configured size limit (2MB by default) are rejected with a 400.")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_describes_upload_route() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();

        let post = &json["paths"]["/uploads"]["post"];
        assert!(post.is_object(), "POST /uploads should be documented");
        assert!(post["requestBody"]["content"]["multipart/form-data"].is_object());
        for status in ["201", "400", "500"] {
            assert!(post["responses"][status].is_object(), "missing {status} response");
        }

        let schemas = &json["components"]["schemas"];
        assert!(post["responses"]["413"].is_null());
        assert!(schemas["UploadResponse"].is_object());
        assert!(schemas["ErrorResponse"].is_object());
    }
}
