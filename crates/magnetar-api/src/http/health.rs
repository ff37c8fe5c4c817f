//! Health and metrics endpoints.

use std::sync::Arc;

use axum::{Json, body::Body, extract::State, http::StatusCode, response::Response};
use magnetar_telemetry::build_sha;
use tracing::error;

use crate::http::constants::METRICS_CONTENT_TYPE;
use crate::http::errors::ApiError;
use crate::models::HealthResponse;
use crate::state::ApiState;

pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.sessions.registry().len(),
        build: build_sha().to_string(),
    })
}

pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let body = state.telemetry.render().map_err(|err| {
        error!(error = %err, "failed to render metrics");
        ApiError::internal("failed to render metrics")
    })?;
    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, METRICS_CONTENT_TYPE)
        .body(Body::from(body))
        .map_err(|err| {
            error!(error = %err, "failed to build metrics response");
            ApiError::internal("failed to build metrics response")
        })
}
