//! # Design
//!
//! - Keep error messages constant while carrying context fields for debugging.
//! - Session errors cover validation and state-machine violations; stream errors
//!   cover everything that can stop a stream before its first byte.

use thiserror::Error;

use crate::model::SessionStatus;
use crate::source::SourceError;
use crate::transcode::TranscodeError;

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The locator was rejected before any session was created.
    #[error("invalid source locator")]
    InvalidLocator {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// A mutation would break the status transition table.
    #[error("invalid session state transition")]
    InvalidTransition {
        /// Affected session.
        session_id: String,
        /// Current status.
        from: SessionStatus,
        /// Rejected target status.
        to: SessionStatus,
    },
    /// The file layout was already recorded.
    #[error("session files already recorded")]
    FilesAlreadySet {
        /// Affected session.
        session_id: String,
    },
}

/// Errors that stop a stream before any byte is delivered.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No session with this identifier exists.
    #[error("session not found")]
    SessionNotFound {
        /// Requested identifier.
        session_id: String,
    },
    /// The session is in the `error` state.
    #[error("session failed")]
    SessionFailed {
        /// Affected session.
        session_id: String,
        /// Engine failure, when recorded.
        message: Option<String>,
    },
    /// The engine is not constructed or has not reported metadata.
    #[error("engine not ready")]
    EngineNotReady {
        /// Affected session.
        session_id: String,
    },
    /// The requested file index does not exist.
    #[error("file index out of range")]
    FileOutOfRange {
        /// Affected session.
        session_id: String,
        /// Requested index.
        file_index: usize,
        /// Number of files in the session.
        file_count: usize,
    },
    /// The session holds no video file.
    #[error("no video files")]
    NoPlayableFile {
        /// Affected session.
        session_id: String,
    },
    /// The file has no downloaded bytes yet.
    #[error("file not yet available")]
    NotYetAvailable {
        /// Affected session.
        session_id: String,
        /// Requested index.
        file_index: usize,
    },
    /// Opening the byte source failed.
    #[error("media source failed")]
    Source {
        /// Affected session.
        session_id: String,
        /// Underlying failure.
        #[source]
        source: SourceError,
    },
    /// The transcoder could not start or failed before producing output.
    #[error("transcoder failed")]
    Transcode {
        /// Affected session.
        session_id: String,
        /// Underlying failure.
        #[source]
        source: TranscodeError,
    },
}
