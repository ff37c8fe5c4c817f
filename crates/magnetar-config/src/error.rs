//! Error types for configuration loading.

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable held a value that could not be parsed.
    #[error("invalid configuration field")]
    InvalidField {
        /// Environment variable that failed validation.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Two fields were individually valid but inconsistent with each other.
    #[error("inconsistent configuration fields")]
    Inconsistent {
        /// First field involved.
        field: &'static str,
        /// Field it conflicts with.
        other: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

impl ConfigError {
    /// Name of the environment variable the error refers to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidField { field, .. } | Self::Inconsistent { field, .. } => field,
        }
    }
}
