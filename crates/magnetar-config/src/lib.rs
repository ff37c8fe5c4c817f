#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]

//! Environment-driven configuration for the Magnetar service.
//!
//! # Design
//! - Every setting has a default; the environment only overrides.
//! - Parsing goes through a lookup closure so tests never touch the process environment.
//! - Validation failures name the offending variable and a machine-readable reason.

pub mod defaults;
pub mod error;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use magnetar_telemetry::LogFormat;

pub use error::{ConfigError, ConfigResult};

use defaults::{
    DEFAULT_BIND_ADDR, DEFAULT_DOWNLOAD_DIR, DEFAULT_EVICTION_THRESHOLD, DEFAULT_HTTP_PORT,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TRANSCODER_PATH,
};

/// Bind address variable.
pub const ENV_BIND_ADDR: &str = "MAGNETAR_BIND_ADDR";
/// Port variable.
pub const ENV_PORT: &str = "MAGNETAR_PORT";
/// Port variable honoured when [`ENV_PORT`] is unset.
pub const ENV_PORT_FALLBACK: &str = "PORT";
/// Download directory variable.
pub const ENV_DOWNLOAD_DIR: &str = "MAGNETAR_DOWNLOAD_DIR";
/// Eviction threshold variable, in seconds.
pub const ENV_EVICTION_THRESHOLD: &str = "MAGNETAR_EVICTION_THRESHOLD_SECS";
/// Sweep interval variable, in seconds.
pub const ENV_SWEEP_INTERVAL: &str = "MAGNETAR_SWEEP_INTERVAL_SECS";
/// Delete downloaded data on eviction.
pub const ENV_EVICT_DELETE_FILES: &str = "MAGNETAR_EVICT_DELETE_FILES";
/// Transcoder executable variable.
pub const ENV_TRANSCODER_PATH: &str = "MAGNETAR_TRANSCODER_PATH";
/// Log format variable (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "MAGNETAR_LOG_FORMAT";
/// Swarm engine variable (`rqbit` or `simulated`).
pub const ENV_ENGINE: &str = "MAGNETAR_ENGINE";

/// Swarm engine backing new sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// Real BitTorrent sessions through librqbit.
    #[default]
    Rqbit,
    /// Deterministic in-memory transfers with generated content, for demos and tests.
    Simulated,
}

impl EngineKind {
    /// Parse a user-supplied engine name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rqbit" | "librqbit" => Some(Self::Rqbit),
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rqbit => "rqbit",
            Self::Simulated => "simulated",
        }
    }
}

/// Fully validated service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Interface the HTTP listener binds to.
    pub bind_addr: IpAddr,
    /// HTTP listener port.
    pub http_port: u16,
    /// Directory downloads are written below.
    pub download_dir: PathBuf,
    /// Idle time after which a session is evicted.
    pub eviction_threshold: Duration,
    /// Period of the cleanup sweep.
    pub sweep_interval: Duration,
    /// Whether eviction also deletes downloaded data.
    pub evict_delete_files: bool,
    /// Transcoder executable.
    pub transcoder_path: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Swarm engine backing new sessions.
    pub engine: EngineKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            http_port: DEFAULT_HTTP_PORT,
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            evict_delete_files: false,
            transcoder_path: DEFAULT_TRANSCODER_PATH.to_string(),
            log_format: LogFormat::infer(),
            engine: EngineKind::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but invalid.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but invalid.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = value(ENV_BIND_ADDR) {
            config.bind_addr = raw.trim().parse().map_err(|_| ConfigError::InvalidField {
                field: ENV_BIND_ADDR,
                value: raw.clone(),
                reason: "not an IP address",
            })?;
        }

        let port = value(ENV_PORT)
            .map(|raw| (ENV_PORT, raw))
            .or_else(|| value(ENV_PORT_FALLBACK).map(|raw| (ENV_PORT_FALLBACK, raw)));
        if let Some((field, raw)) = port {
            config.http_port = parse_port(field, &raw)?;
        }

        if let Some(raw) = value(ENV_DOWNLOAD_DIR) {
            config.download_dir = PathBuf::from(raw.trim());
        }
        if let Some(raw) = value(ENV_EVICTION_THRESHOLD) {
            config.eviction_threshold = parse_seconds(ENV_EVICTION_THRESHOLD, &raw)?;
        }
        if let Some(raw) = value(ENV_SWEEP_INTERVAL) {
            config.sweep_interval = parse_seconds(ENV_SWEEP_INTERVAL, &raw)?;
        }
        if let Some(raw) = value(ENV_EVICT_DELETE_FILES) {
            config.evict_delete_files = parse_flag(ENV_EVICT_DELETE_FILES, &raw)?;
        }
        if let Some(raw) = value(ENV_TRANSCODER_PATH) {
            config.transcoder_path = raw.trim().to_string();
        }
        if let Some(raw) = value(ENV_LOG_FORMAT) {
            config.log_format = LogFormat::parse(&raw).ok_or_else(|| ConfigError::InvalidField {
                field: ENV_LOG_FORMAT,
                value: raw.clone(),
                reason: "expected json or pretty",
            })?;
        }

        if let Some(raw) = value(ENV_ENGINE) {
            config.engine = EngineKind::parse(&raw).ok_or_else(|| ConfigError::InvalidField {
                field: ENV_ENGINE,
                value: raw.clone(),
                reason: "expected rqbit or simulated",
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Inconsistent`] when the sweep would run less often
    /// than sessions become stale.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sweep_interval > self.eviction_threshold {
            return Err(ConfigError::Inconsistent {
                field: ENV_SWEEP_INTERVAL,
                other: ENV_EVICTION_THRESHOLD,
                reason: "sweep interval exceeds eviction threshold",
            });
        }
        Ok(())
    }

    /// Socket address the HTTP listener binds to.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }
}

fn parse_port(field: &'static str, raw: &str) -> ConfigResult<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err(ConfigError::InvalidField {
            field,
            value: raw.to_string(),
            reason: "port must be non-zero",
        }),
        Ok(port) => Ok(port),
        Err(_) => Err(ConfigError::InvalidField {
            field,
            value: raw.to_string(),
            reason: "not a port number",
        }),
    }
}

fn parse_seconds(field: &'static str, raw: &str) -> ConfigResult<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidField {
            field,
            value: raw.to_string(),
            reason: "duration must be positive",
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => Err(ConfigError::InvalidField {
            field,
            value: raw.to_string(),
            reason: "not a whole number of seconds",
        }),
    }
}

fn parse_flag(field: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidField {
            field,
            value: raw.to_string(),
            reason: "not a boolean flag",
        }),
    }
}
