//! Contract between the session layer and a swarm download engine.
//!
//! # Design
//! - One engine instance per session, started through [`SwarmEngine::start`].
//! - Engine lifecycle is reported as typed [`EngineEvent`]s on a per-session channel.
//! - The returned [`EngineHandle`] is the only way to read bytes or release resources.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::source::{SourceError, SourceResponse};

/// Capacity used for per-session event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A file as reported by the engine once metadata is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the content root, `/`-separated.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Transfer statistics sampled by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSample {
    /// Bytes acquired so far.
    pub downloaded: u64,
    /// Total bytes, `0` while unknown.
    pub total: u64,
    /// Bytes per second received.
    pub download_speed: u64,
    /// Bytes per second sent.
    pub upload_speed: u64,
    /// Connected peers.
    pub peers: u32,
}

/// Lifecycle notification emitted by an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Metadata resolved; the file layout is known.
    MetadataReady {
        /// Name advertised by the content.
        name: String,
        /// Files in engine order.
        files: Vec<FileEntry>,
    },
    /// Periodic transfer statistics.
    Progress(ProgressSample),
    /// Every byte has been acquired.
    Completed,
    /// The engine failed; the session cannot recover.
    Error {
        /// Human-readable failure.
        message: String,
    },
    /// The engine serves file bytes over HTTP at `endpoint`.
    ServerReady {
        /// Base URL; file paths are appended to it.
        endpoint: Url,
    },
}

impl EngineEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MetadataReady { .. } => "metadata_ready",
            Self::Progress(_) => "progress",
            Self::Completed => "completed",
            Self::Error { .. } => "error",
            Self::ServerReady { .. } => "server_ready",
        }
    }
}

/// Parameters for starting one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStart {
    /// Session the instance belongs to.
    pub session_id: String,
    /// Locator to resolve.
    pub locator: String,
    /// Directory content is written below.
    pub download_dir: PathBuf,
}

/// Options applied when releasing an engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    /// Also delete downloaded data.
    pub delete_files: bool,
}

/// A started engine instance and its event channel.
pub struct EngineSession {
    /// Exclusive handle to the instance.
    pub handle: Arc<dyn EngineHandle>,
    /// Ordered lifecycle events.
    pub events: mpsc::Receiver<EngineEvent>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession").finish_non_exhaustive()
    }
}

/// Factory for engine instances.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Start an instance for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the instance cannot be constructed.
    async fn start(&self, request: EngineStart) -> Result<EngineSession>;
}

/// Control surface of a running engine instance.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Open a byte source for the file at `file_index`, honouring a raw `Range` header.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotReady`] while the file has no bytes yet.
    async fn open_file(
        &self,
        file_index: usize,
        range: Option<&str>,
    ) -> Result<SourceResponse, SourceError>;

    /// Ask the engine to fetch `file_index` ahead of the others.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine does not support prioritisation.
    async fn prioritize(&self, file_index: usize) -> Result<()> {
        let _ = file_index;
        bail!("file prioritisation is not supported by this engine");
    }

    /// Stop the instance and free its resources. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the instance could not be shut down cleanly.
    async fn release(&self, options: ReleaseOptions) -> Result<()>;
}
