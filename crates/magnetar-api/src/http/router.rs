//! Router construction and server host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{Method, Request, header::CONTENT_TYPE, header::RANGE},
    routing::get,
};
use magnetar_telemetry::{REQUEST_ID_HEADER, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Span, info};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::health::{health, metrics};
use crate::http::sessions::{create_session, delete_session, get_session, list_sessions};
use crate::http::stream::{stream_default, stream_file};
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Axum router wrapper hosting the Magnetar HTTP surface.
pub struct ApiServer {
    router: Router,
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer").finish_non_exhaustive()
    }
}

impl ApiServer {
    /// Wire routes, CORS, request ids, tracing and metrics around `state`.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, RANGE]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(magnetar_telemetry::set_request_id_layer())
            .layer(magnetar_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(state.telemetry.clone()));

        let router = Self::build_router()
            .route_layer(layered)
            .layer(cors_layer)
            .with_state(state);
        Self { router }
    }

    fn build_router() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/torrents", get(list_sessions).post(create_session))
            .route("/torrents/{id}", get(get_session).delete(delete_session))
            .route("/stream/{id}", get(stream_default))
            .route("/stream/{id}/{file_index}", get(stream_file))
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server terminates unexpectedly.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server terminates unexpectedly.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "http server listening");
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }

    /// The assembled router.
    #[must_use]
    pub fn into_router(self) -> Router {
        self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{HASH, magnet, test_state, wait_for_status};
    use crate::models::ProblemDetails;
    use axum::body::{Body, to_bytes};
    use axum::http::{StatusCode, header};
    use magnetar_core::SessionStatus;
    use tower::ServiceExt;

    async fn json<T: serde::de::DeserializeOwned>(
        response: axum::response::Response,
    ) -> anyhow::Result<T> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn torrent_routes_round_trip_through_the_router() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        let router = ApiServer::new(state.clone()).into_router();

        let body = serde_json::json!({ "magnet_link": magnet() }).to_string();
        let created = router
            .clone()
            .oneshot(
                Request::post("/torrents")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body))?,
            )
            .await?;
        assert_eq!(created.status(), StatusCode::OK);
        assert!(created.headers().contains_key(REQUEST_ID_HEADER));
        let snapshot: serde_json::Value = json(created).await?;
        assert_eq!(snapshot["id"], HASH);
        assert_eq!(snapshot["status"], "adding");
        assert!(snapshot.get("downloadSpeed").is_some());
        assert!(snapshot.get("lastAccessedAt").is_some());

        wait_for_status(&state, SessionStatus::Completed).await;
        let listed = router
            .clone()
            .oneshot(Request::get("/torrents").body(Body::empty())?)
            .await?;
        let sessions: Vec<serde_json::Value> = json(listed).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["files"][1]["isVideo"], true);

        let streamed = router
            .clone()
            .oneshot(
                Request::get(format!("/stream/{HASH}"))
                    .header(header::RANGE, "bytes=1000-1999")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(streamed.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            streamed.headers().get(header::CONTENT_RANGE).and_then(|v| v.to_str().ok()),
            Some("bytes 1000-1999/5000")
        );

        let deleted = router
            .clone()
            .oneshot(Request::delete(format!("/torrents/{HASH}")).body(Body::empty())?)
            .await?;
        assert_eq!(deleted.status(), StatusCode::OK);
        let gone = router
            .oneshot(Request::get(format!("/torrents/{HASH}")).body(Body::empty())?)
            .await?;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
        let problem: ProblemDetails = json(gone).await?;
        assert_eq!(problem.status, 404);
        assert_eq!(problem.title, "resource not found");
        Ok(())
    }

    #[tokio::test]
    async fn malformed_body_is_a_problem_document() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let router = ApiServer::new(test_state(dir.path())).into_router();
        let response = router
            .oneshot(
                Request::post("/torrents")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let problem: ProblemDetails = json(response).await?;
        assert_eq!(problem.status, 400);
        Ok(())
    }

    #[tokio::test]
    async fn requests_are_counted_per_route() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        let router = ApiServer::new(state.clone()).into_router();
        let response = router
            .clone()
            .oneshot(Request::get("/stream/unknown").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let rendered = state.telemetry.render()?;
        assert!(rendered.contains(r#"http_requests_total{code="404",route="/stream/{id}"} 1"#));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_file_index_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let state = test_state(dir.path());
        let router = ApiServer::new(state.clone()).into_router();
        state.sessions.add(&magnet(), None)?;
        wait_for_status(&state, SessionStatus::Completed).await;

        let overflow = router
            .clone()
            .oneshot(
                Request::get(format!("/stream/{HASH}/18446744073709551616"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(overflow.status(), StatusCode::NOT_FOUND);
        let problem: ProblemDetails = json(overflow).await?;
        assert_eq!(
            problem.detail.as_deref(),
            Some("file index 18446744073709551616 out of range")
        );

        let garbage = router
            .oneshot(Request::get(format!("/stream/{HASH}/abc")).body(Body::empty())?)
            .await?;
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn server_stops_on_shutdown_signal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = ApiServer::new(test_state(dir.path()));
        let task = tokio::spawn(server.serve_on(listener, async move {
            let _ = stop_rx.await;
        }));
        let _ = stop_tx.send(());
        tokio::time::timeout(Duration::from_secs(5), task).await???;
        Ok(())
    }
}
