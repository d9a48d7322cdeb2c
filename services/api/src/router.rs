//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST surface, the realtime WebSocket endpoint, and
//! OpenAPI documentation.

use crate::{
    handlers,
    models::{ErrorResponse, HealthResponse, ServiceInfo, VoiceInfo},
    state::AppState,
    ws::ws_handler,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::root, handlers::health, handlers::voices),
    components(schemas(ServiceInfo, HealthResponse, VoiceInfo, ErrorResponse)),
    tags(
        (name = "Cascade API", description = "Voice conversation orchestration over STT, LLM, and TTS backends")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/health", get(handlers::health))
        .route("/v1/voices", get(handlers::voices))
        .route("/v1/realtime", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
