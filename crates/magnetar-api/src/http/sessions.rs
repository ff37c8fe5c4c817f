//! Session route handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use magnetar_core::{ReleaseOptions, SessionSnapshot, normalize_session_id};
use tracing::info;

use crate::http::errors::ApiError;
use crate::models::{AddSessionRequest, MessageResponse, RemoveQuery};
use crate::state::ApiState;

pub(crate) async fn create_session(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<AddSessionRequest>, JsonRejection>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let locator = request.locator.unwrap_or_default();
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let outcome = state.sessions.add(&locator, name)?;
    if !outcome.created {
        info!(session_id = %outcome.snapshot.id, "session already registered");
    }
    Ok(Json(outcome.snapshot))
}

pub(crate) async fn list_sessions(State(state): State<Arc<ApiState>>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.list())
}

pub(crate) async fn get_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .sessions
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", normalize_session_id(&id))))
}

pub(crate) async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = normalize_session_id(&id);
    let options = ReleaseOptions {
        delete_files: query.delete_files,
    };
    if state.sessions.remove(&id, options).await {
        Ok(Json(MessageResponse {
            message: format!("session {id} removed"),
        }))
    } else {
        Err(ApiError::not_found(format!("session {id} not found")))
    }
}
