//! HTTP handlers
//!
//! Route table and shared application state for the gateway surfaces.

pub mod health;
pub mod messages;
pub mod relay;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::adaptors::HttpClients;
use crate::config::channels::ChannelsConfig;
use crate::config::settings::Settings;
use crate::relay::store::{MemoryStore, Store};

/// Application state shared by all handlers
pub struct AppState {
    pub settings: Settings,
    pub channels: ChannelsConfig,
    pub clients: HttpClients,
    pub store: Arc<dyn Store>,
}

/// Create the application router
pub async fn create_router(settings: Settings, channels: ChannelsConfig) -> Result<Router> {
    let clients = HttpClients::new(settings.request.timeout, settings.request.stream_timeout)?;

    let max_request_size = settings.request.max_request_size;
    let cors_enabled = settings.security.cors_enabled;

    let app_state = Arc::new(AppState {
        settings,
        channels,
        clients,
        store: Arc::new(MemoryStore::new()),
    });

    let mut router = Router::new()
        .route("/v1/chat/completions", post(relay::handle_chat))
        .route("/v1/completions", post(relay::handle_completions))
        .route("/v1/embeddings", post(relay::handle_embeddings))
        .route("/v1/rerank", post(relay::handle_rerank))
        .route("/v1/images/generations", post(relay::handle_images))
        .route("/v1/audio/speech", post(relay::handle_speech))
        .route("/v1/audio/transcriptions", post(relay::handle_transcription))
        .route("/v1/video/generations", post(relay::handle_video))
        .route("/v1/video/generations/:task_id", get(relay::handle_video_query))
        .route("/v1/models", get(relay::handle_models))
        .route("/v1/messages", post(messages::handle_messages))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            crate::middleware::auth::auth_middleware,
        ))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    Ok(router)
}
