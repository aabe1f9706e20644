use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::SessionRecord;
use crate::rest::error::{ApiResponse, ApiResult};
use crate::rest::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    /// Per-session idle timeout override in seconds.
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionResponse {
    pub session_id: String,
    pub deleted: bool,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<Vec<SessionRecord>>>> {
    Ok(ApiResponse::ok(state.sessions.get_all()))
}

/// Creates a session. The returned record is `Active` with a container
/// bound, or `Queued` with a position when the pool is at capacity.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<ApiResponse<SessionRecord>>> {
    let session = state
        .sessions
        .create_session(request.name, request.timeout_seconds)
        .await?;
    Ok(ApiResponse::ok(session))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<SessionRecord>>> {
    Ok(ApiResponse::ok(state.sessions.get_session(&id)?))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeleteSessionResponse>>> {
    state.sessions.destroy_session(&id).await?;
    Ok(ApiResponse::ok(DeleteSessionResponse {
        session_id: id,
        deleted: true,
    }))
}
