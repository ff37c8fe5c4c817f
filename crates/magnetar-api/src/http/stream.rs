//! Media streaming handlers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use magnetar_core::{MediaStream, normalize_session_id};
use tracing::error;

use crate::http::constants::{ACCEPT_RANGES_BYTES, CACHE_CONTROL_NO_STORE};
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn stream_default(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    stream(&state, &id, None, &headers).await
}

pub(crate) async fn stream_file(
    State(state): State<Arc<ApiState>>,
    Path((id, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_index = parse_file_index(&file_index)?;
    stream(&state, &id, Some(file_index), &headers).await
}

/// Decimal file index; indices past `usize::MAX` cannot exist in any session.
fn parse_file_index(raw: &str) -> Result<usize, ApiError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::bad_request(format!(
            "file index {raw:?} is not a non-negative integer"
        )));
    }
    raw.parse::<usize>()
        .map_err(|_| ApiError::not_found(format!("file index {raw} out of range")))
}

async fn stream(
    state: &ApiState,
    id: &str,
    file_index: Option<usize>,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let media = state
        .pipeline
        .serve(&normalize_session_id(id), file_index, range)
        .await?;
    media_response(media)
}

fn media_response(media: MediaStream) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(media.status.code()).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, media.content_type)
        .header(header::ACCEPT_RANGES, ACCEPT_RANGES_BYTES)
        .header(header::CACHE_CONTROL, CACHE_CONTROL_NO_STORE);
    if let Some(length) = media.content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if let Some(range) = media.content_range {
        builder = builder.header(header::CONTENT_RANGE, range);
    }
    builder.body(Body::from_stream(media.body)).map_err(|err| {
        error!(error = %err, "failed to build stream response");
        ApiError::internal("failed to build stream response")
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::http::test_support::{
        CLIP_HASH, HASH, clip_magnet, magnet, test_state, test_state_with, wait_for,
        wait_for_status,
    };
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use magnetar_core::SessionStatus;
    use magnetar_engine::{SimulationConfig, content_byte};

    fn range(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static(value));
        headers
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn ranged_passthrough_returns_partial_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        state.sessions.add(&magnet(), None)?;
        wait_for_status(&state, SessionStatus::Completed).await;

        let response = stream_default(
            State(state.clone()),
            Path(HASH.to_uppercase()),
            range("bytes=1000-1999"),
        )
        .await
        .map_err(|err| anyhow::anyhow!("{err:?}"))?;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            Some("bytes 1000-1999/5000")
        );
        assert_eq!(header_str(&response, header::CONTENT_LENGTH), Some("1000"));
        assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/mp4"));
        assert_eq!(header_str(&response, header::ACCEPT_RANGES), Some("bytes"));
        assert_eq!(
            header_str(&response, header::CACHE_CONTROL),
            Some(CACHE_CONTROL_NO_STORE)
        );
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let expected: Vec<u8> = (1000..2000).map(|p| content_byte(1, p)).collect();
        assert_eq!(body.as_ref(), expected.as_slice());

        let snapshot = state.sessions.get(HASH).expect("session");
        assert!(snapshot.last_accessed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_mirrored() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        state.sessions.add(&magnet(), None)?;
        wait_for_status(&state, SessionStatus::Completed).await;

        let response = stream_file(State(state), Path((HASH.into(), "1".into())), range("bytes=9000-"))
            .await
            .map_err(|err| anyhow::anyhow!("{err:?}"))?;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            Some("bytes */5000")
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_session_and_out_of_range_index_are_404() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        let missing = stream_default(State(state.clone()), Path("missing".into()), HeaderMap::new())
            .await
            .err()
            .expect("unknown session");
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        state.sessions.add(&magnet(), None)?;
        wait_for_status(&state, SessionStatus::Completed).await;
        let out_of_range = stream_file(State(state), Path((HASH.into(), "7".into())), HeaderMap::new())
            .await
            .err()
            .expect("index 7 of 2 files");
        assert_eq!(out_of_range.status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[test]
    fn file_index_overflow_is_out_of_range() {
        assert_eq!(parse_file_index("3").ok(), Some(3));
        assert_eq!(parse_file_index("007").ok(), Some(7));

        let overflow = parse_file_index("18446744073709551616")
            .err()
            .expect("past usize::MAX");
        assert_eq!(overflow.status, StatusCode::NOT_FOUND);

        for raw in ["abc", "-1", "", "1.5"] {
            let err = parse_file_index(raw).err().expect("not an index");
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{raw:?}");
        }
    }

    #[tokio::test]
    async fn session_without_metadata_is_not_ready() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state_with(
            dir.path(),
            SimulationConfig {
                metadata_ticks: 100_000,
                ..SimulationConfig::quick()
            },
        );
        state
            .sessions
            .add("https://example.org/pending.torrent", None)?;
        let id = state.sessions.list()[0].id.clone();
        wait_for(&state, &id, |s| s.status == SessionStatus::Connecting).await;

        let err = stream_default(State(state), Path(id), HeaderMap::new())
            .await
            .err()
            .expect("engine not ready");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn remux_ignores_range_and_streams_whole_output() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        state.sessions.add(&clip_magnet(), None)?;
        wait_for(&state, CLIP_HASH, |s| s.status == SessionStatus::Completed).await;

        let response = stream_default(State(state), Path(CLIP_HASH.into()), range("bytes=10-20"))
            .await
            .map_err(|err| anyhow::anyhow!("{err:?}"))?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), Some("video/mp4"));
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_RANGE).is_none());
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(body.len(), 3000);
        assert_eq!(body[0], content_byte(0, 0));
        Ok(())
    }
}
