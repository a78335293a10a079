pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::api::error::AppError;
use crate::config::UploadConfig;
use crate::services::clock::SystemClock;
use crate::services::progress::BroadcastPublisher;
use crate::services::storage::StorageBackend;
use crate::services::upload_service::UploadCoordinator;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Notices buffered per progress subscriber before slow ones start lagging.
const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_files,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::UploadResponse,
            api::handlers::upload::UploadedFile,
            api::handlers::health::HealthResponse,
            services::progress::ProgressEvent,
        )
    ),
    tags(
        (name = "upload", description = "Multipart file upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: UploadConfig,
    pub coordinator: Arc<UploadCoordinator>,
    /// Hub the progress transport subscribes to.
    pub progress: Arc<BroadcastPublisher>,
}

impl AppState {
    pub fn new(config: UploadConfig, storage: Arc<dyn StorageBackend>) -> Self {
        let progress = Arc::new(BroadcastPublisher::new(PROGRESS_CHANNEL_CAPACITY));
        let coordinator = Arc::new(UploadCoordinator::new(
            storage,
            progress.clone(),
            Arc::new(SystemClock),
            config.chunk_buffer,
        ));

        Self {
            config,
            coordinator,
            progress,
        }
    }
}

fn cors_layer(config: &UploadConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if config.allows_any_origin() {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(origins))
}

async fn fallback() -> AppError {
    AppError::NotFound("No such route".to_string())
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.max_request_size);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", post(api::handlers::upload::upload_files))
        .route("/upload", post(api::handlers::upload::upload_files))
        .route("/health", get(api::handlers::health::health_check))
        .fallback(fallback)
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors)
        .layer(body_limit)
        .with_state(state)
}
