#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! Magnetar application wiring.
//!
//! Layout: `bootstrap.rs` (service construction and lifecycle), `error.rs` (bootstrap failures).

/// Service construction and lifecycle.
pub mod bootstrap;
/// Application-level errors.
pub mod error;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
