#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! HTTP API for Magnetar.
//!
//! # Design
//! - Handlers stay thin; session and stream semantics live in `magnetar-core`.
//! - Failures render as RFC 9457 problem documents.
//! - Every routed request carries an `x-request-id` and is counted per matched route.

pub mod error;
pub mod http;
pub mod models;
pub mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use models::{AddSessionRequest, HealthResponse, MessageResponse, ProblemDetails, RemoveQuery};
pub use state::ApiState;
