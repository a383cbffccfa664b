//! HTTP request handlers.
//!
//! - [`uploads`]: image upload
//!
//! Handlers return [`crate::errors::Error`] which converts to the appropriate status
//! code and a `{ "message": ... }` JSON body.

pub mod uploads;
