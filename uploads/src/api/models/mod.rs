//! API request and response data models.
//!
//! These models define the public API contract and are annotated with `utoipa`
//! for the generated OpenAPI document.
//!
//! - [`uploads`]: upload form and upload result

pub mod uploads;
