//! RFC9457-style API error wrapper.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use magnetar_core::{SessionError, SourceError, StreamError};
use magnetar_telemetry::{current_request_id, current_route};
use tracing::{debug, error, warn};

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_INTERNAL, PROBLEM_NOT_FOUND, PROBLEM_NOT_YET_AVAILABLE,
    STATUS_TOO_EARLY,
};
use crate::models::ProblemDetails;

/// Structured API error rendered as a problem document.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    detail: Option<String>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(message)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            PROBLEM_NOT_FOUND,
            "resource not found",
        )
        .with_detail(detail)
    }

    pub(crate) fn too_early(detail: impl Into<String>) -> Self {
        Self::new(
            too_early_status(),
            PROBLEM_NOT_YET_AVAILABLE,
            "not yet available",
        )
        .with_detail(detail)
    }

    #[cfg(test)]
    pub(crate) fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

fn too_early_status() -> StatusCode {
    StatusCode::from_u16(STATUS_TOO_EARLY).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = current_request_id().unwrap_or_default();
        let route = current_route().unwrap_or_default();
        let status = self.status.as_u16();
        let detail = self.detail.as_deref().unwrap_or_default();
        if self.status.is_server_error() {
            error!(%request_id, %route, status, kind = self.kind, detail, "request failed");
        } else {
            debug!(%request_id, %route, status, kind = self.kind, detail, "request rejected");
        }
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidLocator { reason } => Self::bad_request(reason),
            other => {
                error!(error = %other, "session operation failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::SessionNotFound { session_id } => {
                Self::not_found(format!("session {session_id} not found"))
            }
            StreamError::SessionFailed { message, .. } => Self::not_found(message.map_or_else(
                || "session failed".to_string(),
                |message| format!("session failed: {message}"),
            )),
            StreamError::EngineNotReady { .. } => Self::not_found("engine not ready"),
            StreamError::FileOutOfRange {
                file_index,
                file_count,
                ..
            } => Self::not_found(format!(
                "file index {file_index} out of range ({file_count} files)"
            )),
            StreamError::NoPlayableFile { .. } => Self::not_found("no video files"),
            StreamError::NotYetAvailable { file_index, .. } => {
                Self::too_early(format!("file {file_index} has no downloaded bytes yet"))
            }
            StreamError::Source {
                source: SourceError::UnknownFile { file_index },
                ..
            } => Self::not_found(format!("file {file_index} is not known to the engine")),
            StreamError::Source {
                session_id,
                source,
            } => {
                error!(%session_id, error = %source, "media source failed before streaming");
                Self::internal("failed to open media source")
            }
            StreamError::Transcode {
                session_id,
                source,
            } => {
                warn!(%session_id, error = %source, "remux failed before streaming");
                Self::internal("transcoder failed before producing output")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};

    use magnetar_core::TranscodeError;
    use magnetar_telemetry::with_request_context;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner))
                .into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn error_responses_log_the_request_context() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let response = with_request_context("req-42", "/stream/{id}", async {
            ApiError::from(StreamError::EngineNotReady {
                session_id: "x".into(),
            })
            .into_response()
        })
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let logs = captured.text();
        assert!(logs.contains("request rejected"), "{logs}");
        assert!(logs.contains("req-42"), "{logs}");
        assert!(logs.contains("/stream/{id}"), "{logs}");

        let _ = with_request_context("req-43", "/torrents", async {
            ApiError::internal("boom").into_response()
        })
        .await;
        let logs = captured.text();
        assert!(logs.contains("request failed"), "{logs}");
        assert!(logs.contains("req-43"), "{logs}");
    }

    #[test]
    fn stream_errors_map_to_statuses() {
        let cases = [
            (
                StreamError::SessionNotFound {
                    session_id: "x".into(),
                },
                404,
            ),
            (
                StreamError::FileOutOfRange {
                    session_id: "x".into(),
                    file_index: 7,
                    file_count: 2,
                },
                404,
            ),
            (
                StreamError::NotYetAvailable {
                    session_id: "x".into(),
                    file_index: 0,
                },
                425,
            ),
            (
                StreamError::Transcode {
                    session_id: "x".into(),
                    source: TranscodeError::Pipe { stream: "stdout" },
                },
                500,
            ),
            (
                StreamError::Source {
                    session_id: "x".into(),
                    source: SourceError::UnknownFile { file_index: 3 },
                },
                404,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status.as_u16(), status);
        }
    }

    #[test]
    fn out_of_range_detail_names_the_index() {
        let err = ApiError::from(StreamError::FileOutOfRange {
            session_id: "x".into(),
            file_index: 7,
            file_count: 2,
        });
        assert_eq!(err.detail(), Some("file index 7 out of range (2 files)"));
        assert_eq!(err.kind, PROBLEM_NOT_FOUND);
    }

    #[test]
    fn invalid_locator_is_a_bad_request() {
        let err = ApiError::from(SessionError::InvalidLocator {
            reason: "locator is required",
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.detail(), Some("locator is required"));
    }
}
