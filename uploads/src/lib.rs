//! # uploads: image upload service
//!
//! `uploads` exposes a single `POST /uploads` endpoint. It accepts one file as
//! `multipart/form-data`, hands it to an upload service, and answers with the URL the file
//! can be fetched from.
//!
//! ## Request flow
//!
//! The handler ([`api::handlers::uploads::upload_image`]) takes the first multipart part that
//! carries a filename. It wraps the part's byte stream in a
//! [`SizeLimitedStream`](upload::limited::SizeLimitedStream), which passes content through up
//! to `limits.max_file_size` (2MB by default) and silently discards the rest. The limited stream
//! is handed to the [`UploadService`](upload::UploadService) collaborator. Once the service
//! returns, the handler drains whatever was left unread and only then checks whether the file
//! was truncated. A truncated file is rejected with 400 "File size limit reached." no matter
//! what the service answered.
//!
//! The production service is [`upload::ImageUploader`]: it checks the declared content type
//! against an allow-list and streams the content into an
//! [`ObjectStore`](storage::ObjectStore) (local filesystem, S3-compatible bucket, or memory).
//!
//! ## Running
//!
//! ```no_run
//! use uploads::{Application, Config, telemetry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config).await?.serve(std::future::pending()).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod storage;
pub mod telemetry;
pub mod upload;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
use config::CorsOrigin;
use openapi::ApiDoc;
use upload::{ImageUploader, UploadService};

/// Shared state handed to every handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub uploader: Arc<dyn UploadService>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // tower-http refuses `*` inside an origin list
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `POST /uploads`, with axum's body limit lifted; the handler bounds how much of the file
///   it reads (`limits.max_request_size`) after the upload service has been called
/// - `GET /healthz`
/// - `GET /api-docs/openapi.json` and the Scalar UI at `/docs`
/// - `/files`, when the local storage backend is configured to serve its directory
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut router = Router::new()
        .route(
            "/uploads",
            post(api::handlers::uploads::upload_image).layer(DefaultBodyLimit::disable()),
        )
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state.clone());

    if let Some(directory) = state.config.storage.served_directory() {
        debug!("Serving stored files from {} at /files", directory.display());
        router = router.nest_service("/files", ServeDir::new(directory));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The upload server: configured storage, uploader and router.
///
/// 1. **Create**: [`Application::new`] connects the storage backend and builds the router
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests
///    until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting uploads service with configuration: {:#?}", config);

        let store = storage::from_config(&config.storage).await?;
        let uploader = Arc::new(ImageUploader::new(store, &config.images, config.storage.public_url().clone()));

        let app_state = AppState::builder().config(config.clone()).uploader(uploader).build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Uploads service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::StorageConfig;
    use crate::test_utils::{MockOutcome, MockUploader, create_test_app, create_test_config};
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};

    fn mock() -> Arc<MockUploader> {
        Arc::new(MockUploader::new(MockOutcome::Success("https://cdn.test/a.png".to_string())))
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = create_test_app(create_test_config(), mock());

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_openapi_json_and_docs_are_served() {
        let server = create_test_app(create_test_config(), mock());

        let response = server.get("/api-docs/openapi.json").await;
        response.assert_status_ok();
        let content = response.text();
        assert!(content.contains("\"openapi\""));
        assert!(content.contains("/uploads"));

        let docs = server.get("/docs").await;
        docs.assert_status_ok();
    }

    #[tokio::test]
    async fn test_get_on_upload_route_is_not_allowed() {
        let server = create_test_app(create_test_config(), mock());

        let response = server.get("/uploads").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let mut config = create_test_config();
        config.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com".parse().unwrap())];
        let server = create_test_app(config, mock());

        let response = server
            .method(http::Method::OPTIONS, "/uploads")
            .add_header(http::header::ORIGIN, "https://app.example.com")
            .add_header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .await;

        assert_eq!(
            response.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );
    }

    #[tokio::test]
    async fn test_application_serves_uploaded_files_from_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.storage = StorageConfig::Local {
            path: dir.path().to_path_buf(),
            public_url: "http://localhost:3333/files".parse().unwrap(),
            serve_files: true,
        };

        let server = Application::new(config).await.unwrap().into_test_server();

        let form = MultipartForm::new().add_part("file", Part::bytes(b"\x89PNG".to_vec()).file_name("cat.png").mime_type("image/png"));
        let response = server.post("/uploads").multipart(form).await;
        response.assert_status(StatusCode::CREATED);

        let url: String = response.json::<serde_json::Value>()["url"].as_str().unwrap().to_string();
        let path = url.trim_start_matches("http://localhost:3333");
        assert!(path.starts_with("/files/uploads/"));

        let file = server.get(path).await;
        file.assert_status_ok();
        assert_eq!(file.as_bytes().as_ref(), b"\x89PNG");
    }

    #[tokio::test]
    async fn test_files_are_not_served_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.png"), b"data").unwrap();

        let mut config = create_test_config();
        config.storage = StorageConfig::Local {
            path: dir.path().to_path_buf(),
            public_url: "http://localhost:3333/files".parse().unwrap(),
            serve_files: false,
        };

        let server = Application::new(config).await.unwrap().into_test_server();

        let response = server.get("/files/secret.png").await;
        response.assert_status_not_found();
    }
}
