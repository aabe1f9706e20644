use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::error::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Uniform JSON envelope for every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    pub timestamp: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            error_info: None,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Core(#[from] Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Core(err) => {
                let (status, code) = match err {
                    Error::EngineUnreachable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "ENGINE_UNREACHABLE")
                    }
                    Error::ContainerNotFound(_) => (StatusCode::NOT_FOUND, "CONTAINER_NOT_FOUND"),
                    Error::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR"),
                    Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
                    Error::SessionNotReady(_) => (StatusCode::BAD_REQUEST, "SESSION_NOT_READY"),
                    Error::SessionNotActive(_) => (StatusCode::BAD_REQUEST, "SESSION_NOT_ACTIVE"),
                    Error::FileNotFound(_) => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
                    Error::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
                    Error::OperationTimeout(_) => {
                        (StatusCode::REQUEST_TIMEOUT, "OPERATION_TIMEOUT")
                    }
                    Error::MaxContainersReached => {
                        (StatusCode::SERVICE_UNAVAILABLE, "MAX_CONTAINERS_REACHED")
                    }
                    Error::InvalidTimeout(_) => (StatusCode::BAD_REQUEST, "INVALID_TIMEOUT"),
                };
                (status, code, err.to_string())
            }
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = ApiResponse::<serde_json::Value> {
            success: false,
            data: None,
            error: Some(message.clone()),
            error_info: Some(ErrorInfo {
                code: code.to_string(),
                message,
                details: None,
            }),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn core_errors_map_to_documented_statuses() {
        assert_eq!(
            status_of(Error::EngineUnreachable("socket".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::SessionNotFound("x".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::SessionNotReady("x".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(Error::OperationTimeout(Duration::from_secs(2)).into()),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_of(Error::MaxContainersReached.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::InvalidTimeout(60).into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn envelope_carries_error_info() {
        let body = ApiResponse::<serde_json::Value> {
            success: false,
            data: None,
            error: Some("boom".to_string()),
            error_info: Some(ErrorInfo {
                code: "ENGINE_ERROR".to_string(),
                message: "boom".to_string(),
                details: None,
            }),
            timestamp: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorInfo"]["code"], "ENGINE_ERROR");
        assert!(json.get("data").is_none());
    }
}
