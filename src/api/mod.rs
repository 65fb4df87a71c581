//! HTTP API server

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

pub mod handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
}

/// Build the API router using the provided application config.
pub fn create_router(config: Arc<AppConfig>) -> Router {
    let actions = get(handlers::handle_get)
        .put(handlers::handle_upload)
        .post(handlers::handle_action)
        .delete(handlers::handle_delete);

    Router::new()
        .route("/status", get(handlers::status))
        // A bare provider segment addresses the provider root.
        .route("/:provider", actions.clone())
        .route("/:provider/", actions.clone())
        .route("/:provider/*path", actions)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { config })
}
