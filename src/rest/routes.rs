use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::rest::openapi::ApiDoc;
use crate::rest::{handlers, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Admin endpoints
        .route("/admin/status", get(handlers::admin::get_status))
        .route("/admin/containers", get(handlers::admin::list_containers))
        .route("/admin/containers", post(handlers::admin::create_container))
        .route(
            "/admin/containers/{id}",
            delete(handlers::admin::delete_container),
        )
        .route(
            "/admin/containers",
            delete(handlers::admin::delete_all_containers),
        )
        .route("/admin/prewarm", post(handlers::admin::prewarm))
        .route("/admin/sessions", get(handlers::admin::list_sessions))
        .route(
            "/admin/sessions/{id}",
            delete(handlers::admin::delete_session),
        )
        // Session endpoints
        .route("/sessions", get(handlers::sessions::list_sessions))
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/{id}", get(handlers::sessions::get_session))
        .route("/sessions/{id}", delete(handlers::sessions::delete_session))
        // Command endpoints
        .route(
            "/sessions/{id}/commands",
            post(handlers::commands::run_command),
        )
        .route(
            "/sessions/{id}/commands/stream",
            post(handlers::commands::stream_command),
        )
        // File endpoints
        .route("/sessions/{id}/files/list", get(handlers::files::list_files))
        .route(
            "/sessions/{id}/files/upload",
            post(handlers::files::upload_file),
        )
        .route(
            "/sessions/{id}/files/download",
            get(handlers::files::download_file),
        )
        .route("/sessions/{id}/files", delete(handlers::files::delete_file))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .nest("/api", api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
