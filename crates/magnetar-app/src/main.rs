#![forbid(unsafe_code)]
#![deny(unused_must_use)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]

//! Binary entrypoint for the Magnetar streaming service.

use magnetar_app::{AppResult, run_app};

/// Boots the service and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
