use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::models::{ContainerRecord, SessionRecord, SystemStatus};
use crate::rest::error::{ApiResponse, ApiResult};
use crate::rest::AppState;
use crate::status::system_status;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteContainerResponse {
    pub container_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllContainersResponse {
    pub deleted: usize,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<SystemStatus>>> {
    Ok(ApiResponse::ok(system_status(
        &state.config,
        &state.container_store,
        &state.session_store,
    )))
}

pub async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<Vec<ContainerRecord>>>> {
    Ok(ApiResponse::ok(state.pool.get_all()))
}

/// Warms one extra container and leaves it idle and unbound.
pub async fn create_container(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<ContainerRecord>>> {
    let container = state.pool.create_on_demand().await?;
    Ok(ApiResponse::ok(container))
}

/// Removes a container; a session bound to it becomes terminal.
pub async fn delete_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeleteContainerResponse>>> {
    state.sessions.on_container_removed_externally(&id);
    state.pool.force_delete(&id).await;
    Ok(ApiResponse::ok(DeleteContainerResponse {
        container_id: id,
        deleted: true,
    }))
}

pub async fn delete_all_containers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<DeleteAllContainersResponse>>> {
    let containers = state.pool.get_all();
    for container in &containers {
        state
            .sessions
            .on_container_removed_externally(&container.container_id);
    }
    state.pool.delete_all().await;
    Ok(ApiResponse::ok(DeleteAllContainersResponse {
        deleted: containers.len(),
    }))
}

pub async fn prewarm(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<SystemStatus>>> {
    state.pool.ensure_prewarmed().await?;
    Ok(ApiResponse::ok(system_status(
        &state.config,
        &state.container_store,
        &state.session_store,
    )))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ApiResponse<Vec<SessionRecord>>>> {
    Ok(ApiResponse::ok(state.sessions.get_all()))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<super::sessions::DeleteSessionResponse>>> {
    state.sessions.destroy_session(&id).await?;
    Ok(ApiResponse::ok(super::sessions::DeleteSessionResponse {
        session_id: id,
        deleted: true,
    }))
}
