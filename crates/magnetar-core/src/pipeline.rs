//! Per-request media delivery: file resolution, remux decision and source bridging.
//!
//! # Design
//! - Everything that can fail before the first byte is resolved here and reported as
//!   a [`StreamError`]; after that, failures travel inside the body stream.
//! - Passthrough mirrors the source's status, length and `Content-Range` verbatim.
//! - Remux reads the whole file and answers 200 without a length.
//! - The body owns the upstream stream (and, for remux, the transcoder), so dropping
//!   the response cancels both.

use std::sync::Arc;

use futures_util::StreamExt;
use magnetar_telemetry::Metrics;
use tracing::{info, warn};

use crate::engine::EngineHandle;
use crate::error::StreamError;
use crate::model::{SessionFile, SessionSnapshot, SessionStatus, extension_of};
use crate::registry::SessionRegistry;
use crate::remote::RemoteSource;
use crate::selector::select_best_file;
use crate::source::{ByteStream, SourceError, SourceResponse, SourceStatus};
use crate::transcode::{TranscodeError, Transcoder};

/// Containers browsers cannot play directly.
pub const REMUX_EXTENSIONS: [&str; 4] = ["mkv", "avi", "wmv", "flv"];

/// Content type of remuxed output.
pub const REMUX_CONTENT_TYPE: &str = "video/mp4";

/// How a file is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Bytes are forwarded untouched.
    Passthrough,
    /// Bytes go through the transcoder.
    Remux,
}

impl DeliveryMode {
    /// Mode for a file name.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        match extension_of(name) {
            Some(ext) if REMUX_EXTENSIONS.contains(&ext.as_str()) => Self::Remux,
            _ => Self::Passthrough,
        }
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Remux => "remux",
        }
    }
}

/// Content type for a file delivered untouched.
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("wma") => "audio/x-ms-wma",
        _ => "application/octet-stream",
    }
}

/// A stream ready to be written to the client.
pub struct MediaStream {
    /// File being delivered.
    pub file: SessionFile,
    /// Delivery mode.
    pub mode: DeliveryMode,
    /// Status to present.
    pub status: SourceStatus,
    /// `Content-Type` value.
    pub content_type: &'static str,
    /// `Content-Length` value, when known.
    pub content_length: Option<u64>,
    /// `Content-Range` value, for partial and unsatisfiable answers.
    pub content_range: Option<String>,
    /// Body bytes.
    pub body: ByteStream,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("file", &self.file.path)
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Resolves stream requests against the registry.
pub struct StreamPipeline {
    registry: Arc<SessionRegistry>,
    transcoder: Arc<dyn Transcoder>,
    remote: RemoteSource,
    metrics: Metrics,
}

impl StreamPipeline {
    /// Build a pipeline over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        transcoder: Arc<dyn Transcoder>,
        remote: RemoteSource,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            transcoder,
            remote,
            metrics,
        }
    }

    /// Serve `file_index` (or the best video) of session `session_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StreamError`] for every failure detected before the first byte.
    pub async fn serve(
        &self,
        session_id: &str,
        file_index: Option<usize>,
        range: Option<&str>,
    ) -> Result<MediaStream, StreamError> {
        let (session, engine) = self
            .registry
            .get_with_engine(session_id)
            .ok_or_else(|| StreamError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let engine = ready_engine(&session, engine)?;
        let file = resolve_file(&session, file_index)?.clone();
        self.registry.touch(session_id);

        let mode = DeliveryMode::for_name(&file.name);
        let source_range = match mode {
            DeliveryMode::Passthrough => range,
            DeliveryMode::Remux => None,
        };
        let source = self
            .open_source(&session, engine.as_ref(), &file, source_range)
            .await?;

        info!(
            session_id,
            file_index = file.index,
            mode = mode.as_str(),
            status = source.status.code(),
            "media stream starting"
        );
        self.metrics.inc_stream(mode.as_str());

        match mode {
            DeliveryMode::Passthrough => Ok(MediaStream {
                content_type: content_type_for(&file.name),
                file,
                mode,
                status: source.status,
                content_length: source.content_length,
                content_range: source.content_range,
                body: source.body,
            }),
            DeliveryMode::Remux => {
                let body = self.remux(session_id, source.body).await?;
                Ok(MediaStream {
                    file,
                    mode,
                    status: SourceStatus::Full,
                    content_type: REMUX_CONTENT_TYPE,
                    content_length: None,
                    content_range: None,
                    body,
                })
            }
        }
    }

    async fn open_source(
        &self,
        session: &SessionSnapshot,
        engine: &dyn EngineHandle,
        file: &SessionFile,
        range: Option<&str>,
    ) -> Result<SourceResponse, StreamError> {
        let opened = match &session.stream_endpoint {
            Some(endpoint) => {
                self.remote
                    .open(endpoint, file.index, &file.path, range)
                    .await
            }
            None => engine.open_file(file.index, range).await,
        };
        opened.map_err(|err| match err {
            SourceError::NotReady => StreamError::NotYetAvailable {
                session_id: session.id.clone(),
                file_index: file.index,
            },
            other => StreamError::Source {
                session_id: session.id.clone(),
                source: other,
            },
        })
    }

    /// Start the transcoder and wait for its first chunk, so start-up failures can
    /// still become an error response.
    async fn remux(&self, session_id: &str, input: ByteStream) -> Result<ByteStream, StreamError> {
        let transcode_error = |source| StreamError::Transcode {
            session_id: session_id.to_string(),
            source,
        };
        let mut output = self.transcoder.remux(input).map_err(transcode_error)?;
        match output.next().await {
            Some(Ok(first)) => Ok(Box::pin(
                futures_util::stream::iter([Ok(first)]).chain(output),
            )),
            Some(Err(source)) => {
                warn!(session_id, error = %source, "transcoder failed before producing output");
                Err(transcode_error(TranscodeError::Output { source }))
            }
            None => Ok(Box::pin(futures_util::stream::empty())),
        }
    }
}

fn ready_engine(
    session: &SessionSnapshot,
    engine: Option<Arc<dyn EngineHandle>>,
) -> Result<Arc<dyn EngineHandle>, StreamError> {
    if session.status == SessionStatus::Error {
        return Err(StreamError::SessionFailed {
            session_id: session.id.clone(),
            message: session.error.clone(),
        });
    }
    match engine {
        Some(engine) if !session.files.is_empty() => Ok(engine),
        _ => Err(StreamError::EngineNotReady {
            session_id: session.id.clone(),
        }),
    }
}

fn resolve_file(
    session: &SessionSnapshot,
    file_index: Option<usize>,
) -> Result<&SessionFile, StreamError> {
    match file_index {
        Some(index) => session
            .files
            .get(index)
            .ok_or_else(|| StreamError::FileOutOfRange {
                session_id: session.id.clone(),
                file_index: index,
                file_count: session.files.len(),
            }),
        None => select_best_file(&session.files).ok_or_else(|| StreamError::NoPlayableFile {
            session_id: session.id.clone(),
        }),
    }
}
