//! # Design
//!
//! - Centralize bootstrap errors; each carries the failing operation.
//! - Messages stay constant; sources are preserved, not re-logged.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or was inconsistent.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: magnetar_config::ConfigError,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: magnetar_telemetry::TelemetryError,
    },
    /// The HTTP server failed to bind or terminated unexpectedly.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: magnetar_api::ApiServerError,
    },
    /// The swarm engine could not be started.
    #[error("engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: anyhow::Error,
    },
    /// Filesystem preparation failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved, if any.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: magnetar_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: magnetar_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: magnetar_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    pub(crate) fn engine(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Engine { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn helpers_keep_operation_and_source() {
        let err = AppError::io(
            "download_dir.create",
            "/nope",
            io::Error::other("denied"),
        );
        assert!(matches!(
            &err,
            AppError::Io { operation: "download_dir.create", path: Some(path), .. }
                if path.as_path() == std::path::Path::new("/nope")
        ));
        assert_eq!(err.to_string(), "io operation failed");
        assert!(err.source().is_some());

        let config = AppError::config(
            "config.validate",
            magnetar_config::ConfigError::Inconsistent {
                field: magnetar_config::ENV_SWEEP_INTERVAL,
                other: magnetar_config::ENV_EVICTION_THRESHOLD,
                reason: "sweep interval exceeds eviction threshold",
            },
        );
        assert!(matches!(config, AppError::Config { operation: "config.validate", .. }));

        let engine = AppError::engine("engine.rqbit.start", anyhow::anyhow!("dht bind failed"));
        assert_eq!(engine.to_string(), "engine operation failed");
        assert_eq!(
            engine.source().map(ToString::to_string).as_deref(),
            Some("dht bind failed")
        );
    }
}
