//! Vigil API - HTTP routes of the remote signer
//!
//! Thin axum handlers over `vigil-signing`. Handlers parse bodies
//! themselves so every malformed body is a 400, and [`ApiError`] owns the
//! mapping from signing outcomes to status codes.

#![forbid(unsafe_code)]

/// Error to status code mapping
pub mod error;

/// Route handlers
pub mod routes;

/// Router and server
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{router, ApiContext, ApiServer, ApiState};
