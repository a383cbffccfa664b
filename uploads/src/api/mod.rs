//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`.
//! The document is served at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
