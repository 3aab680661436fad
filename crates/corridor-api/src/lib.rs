//! HTTP API surface for the Corridor IM server.
//!
//! Thin handlers over [`corridor_core::Context`]: parse, validate, route
//! to the slot leader when needed, and translate core errors to HTTP
//! statuses. No business logic lives here.

pub mod error;
pub mod forward;
pub mod handlers;
pub mod models;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::configure;
