use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Error;
use crate::models::FileEntry;
use crate::rest::error::{ApiError, ApiResponse, ApiResult};
use crate::rest::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub target_path: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    pub path: String,
    pub entries: Vec<FileEntry>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_path: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub path: String,
    pub deleted: bool,
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<ApiResponse<FileListResponse>>> {
    let entries = state.files.list(&id, &query.path).await?;
    Ok(ApiResponse::ok(FileListResponse {
        path: query.path,
        total_count: entries.len(),
        entries,
    }))
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<ApiResponse<UploadResponse>>> {
    let mut payload: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("invalid multipart body: {err}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::BadRequest(format!("failed to read upload: {err}")))?;
            payload = Some(bytes.to_vec());
            break;
        }
    }
    let Some(bytes) = payload else {
        return Err(Error::InvalidArgument("multipart field 'file' is required".to_string()).into());
    };

    state.files.upload(&id, &query.target_path, bytes).await?;
    Ok(ApiResponse::ok(UploadResponse {
        success: true,
        file_path: query.target_path,
    }))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let bytes = state.files.download(&id, &query.path).await?;
    let filename = query.path.rsplit('/').next().unwrap_or("download");
    let headers = [
        (
            header::CONTENT_TYPE,
            content_type_for(&query.path).to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, bytes).into_response())
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<ApiResponse<DeleteFileResponse>>> {
    state.files.delete(&id, &query.path).await?;
    Ok(ApiResponse::ok(DeleteFileResponse {
        path: query.path,
        deleted: true,
    }))
}

/// Plain text for common code and text extensions, opaque bytes otherwise.
fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "md" | "log" | "py" | "rs" | "js" | "ts" | "go" | "java" | "c" | "h" | "cpp"
        | "sh" | "rb" | "toml" | "yaml" | "yml" | "cfg" | "ini" | "csv" | "sql" | "xml" => {
            "text/plain; charset=utf-8"
        }
        "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}
