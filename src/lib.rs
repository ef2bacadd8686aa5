pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::TempFileConfig;
use crate::services::temp_file_store::TempFileStore;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::temp_files::upload_temp_file,
        api::handlers::temp_files::download_temp_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::temp_files::TempFileResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "temp-files", description = "Short-lived download link endpoints"),
        (name = "system", description = "Service health endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TempFileStore>,
    pub config: TempFileConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/api/temp-file",
            post(api::handlers::temp_files::upload_temp_file),
        )
        .route(
            "/api/temp-file/:token",
            get(api::handlers::temp_files::download_temp_file),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
