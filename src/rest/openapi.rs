use utoipa::OpenApi;

use crate::models::{
    CommandResult, ContainerRecord, ContainerStatus, FileEntry, SessionRecord, SessionStatus,
    StatusCounts, SystemStatus,
};
use crate::rest::error::ErrorInfo;
use crate::rest::handlers::{
    admin::{DeleteAllContainersResponse, DeleteContainerResponse},
    commands::CommandRequest,
    files::{DeleteFileResponse, FileListResponse, UploadResponse},
    sessions::{CreateSessionRequest, DeleteSessionResponse},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::rest::openapi::get_status,
        crate::rest::openapi::list_containers,
        crate::rest::openapi::create_container,
        crate::rest::openapi::delete_container,
        crate::rest::openapi::delete_all_containers,
        crate::rest::openapi::prewarm,
        crate::rest::openapi::list_sessions,
        crate::rest::openapi::create_session,
        crate::rest::openapi::get_session,
        crate::rest::openapi::delete_session,
        crate::rest::openapi::run_command,
        crate::rest::openapi::stream_command,
        crate::rest::openapi::list_files,
        crate::rest::openapi::upload_file,
        crate::rest::openapi::download_file,
        crate::rest::openapi::delete_file,
    ),
    components(
        schemas(
            ContainerRecord,
            ContainerStatus,
            SessionRecord,
            SessionStatus,
            StatusCounts,
            SystemStatus,
            CommandRequest,
            CommandResult,
            FileEntry,
            FileListResponse,
            UploadResponse,
            DeleteFileResponse,
            CreateSessionRequest,
            DeleteSessionResponse,
            DeleteContainerResponse,
            DeleteAllContainersResponse,
            ErrorInfo,
        )
    ),
    tags(
        (name = "Admin", description = "Pool administration"),
        (name = "Sessions", description = "Session lifecycle"),
        (name = "Commands", description = "Command execution"),
        (name = "Files", description = "File exchange with a session container"),
    ),
    info(
        title = "codepod REST API",
        version = "0.1.0",
        description = "Container-backed code execution host",
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
)]
pub struct ApiDoc;

#[utoipa::path(
    get,
    path = "/api/admin/status",
    tag = "Admin",
    responses(
        (status = 200, description = "Pool and session counts", body = SystemStatus),
    ),
)]
#[allow(dead_code)]
pub async fn get_status() {}

#[utoipa::path(
    get,
    path = "/api/admin/containers",
    tag = "Admin",
    responses(
        (status = 200, description = "All managed containers", body = Vec<ContainerRecord>),
    ),
)]
#[allow(dead_code)]
pub async fn list_containers() {}

#[utoipa::path(
    post,
    path = "/api/admin/containers",
    tag = "Admin",
    responses(
        (status = 200, description = "Idle container created", body = ContainerRecord),
        (status = 503, description = "Capacity cap reached", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn create_container() {}

#[utoipa::path(
    delete,
    path = "/api/admin/containers/{id}",
    tag = "Admin",
    params(
        ("id" = String, Path, description = "Container ID"),
    ),
    responses(
        (status = 200, description = "Container removed; bound session destroyed", body = DeleteContainerResponse),
    ),
)]
#[allow(dead_code)]
pub async fn delete_container() {}

#[utoipa::path(
    delete,
    path = "/api/admin/containers",
    tag = "Admin",
    responses(
        (status = 200, description = "All managed containers removed", body = DeleteAllContainersResponse),
    ),
)]
#[allow(dead_code)]
pub async fn delete_all_containers() {}

#[utoipa::path(
    post,
    path = "/api/admin/prewarm",
    tag = "Admin",
    responses(
        (status = 200, description = "Warm reserve initialized", body = SystemStatus),
        (status = 503, description = "Engine unavailable", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn prewarm() {}

#[utoipa::path(
    get,
    path = "/api/sessions",
    tag = "Sessions",
    responses(
        (status = 200, description = "Non-destroyed sessions", body = Vec<SessionRecord>),
    ),
)]
#[allow(dead_code)]
pub async fn list_sessions() {}

#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "Sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created, active or queued", body = SessionRecord),
        (status = 400, description = "Timeout out of range", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn create_session() {}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    tag = "Sessions",
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session details", body = SessionRecord),
        (status = 404, description = "Session not found", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn get_session() {}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}",
    tag = "Sessions",
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Session destroyed (idempotent)", body = DeleteSessionResponse),
    ),
)]
#[allow(dead_code)]
pub async fn delete_session() {}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/commands",
    tag = "Commands",
    request_body = CommandRequest,
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "Command output", body = CommandResult),
        (status = 400, description = "Session not active or not ready", body = ErrorInfo),
        (status = 404, description = "Session not found", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn run_command() {}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/commands/stream",
    tag = "Commands",
    request_body = CommandRequest,
    params(
        ("id" = String, Path, description = "Session ID"),
    ),
    responses(
        (status = 200, description = "SSE stream of stdout/stderr/exit events"),
        (status = 404, description = "Session not found", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn stream_command() {}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/files/list",
    tag = "Files",
    params(
        ("id" = String, Path, description = "Session ID"),
        ("path" = String, Query, description = "Absolute directory path"),
    ),
    responses(
        (status = 200, description = "Directory listing", body = FileListResponse),
        (status = 404, description = "Path not found", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn list_files() {}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/files/upload",
    tag = "Files",
    params(
        ("id" = String, Path, description = "Session ID"),
        ("targetPath" = String, Query, description = "Absolute destination path"),
    ),
    responses(
        (status = 200, description = "File uploaded", body = UploadResponse),
        (status = 400, description = "Missing file field or invalid path", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn upload_file() {}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}/files/download",
    tag = "Files",
    params(
        ("id" = String, Path, description = "Session ID"),
        ("path" = String, Query, description = "Absolute file path"),
    ),
    responses(
        (status = 200, description = "File bytes as attachment"),
        (status = 404, description = "File not found", body = ErrorInfo),
    ),
)]
#[allow(dead_code)]
pub async fn download_file() {}

#[utoipa::path(
    delete,
    path = "/api/sessions/{id}/files",
    tag = "Files",
    params(
        ("id" = String, Path, description = "Session ID"),
        ("path" = String, Query, description = "Absolute path to remove"),
    ),
    responses(
        (status = 200, description = "Path removed", body = DeleteFileResponse),
    ),
)]
#[allow(dead_code)]
pub async fn delete_file() {}
