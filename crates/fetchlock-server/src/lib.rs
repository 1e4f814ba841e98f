//! fetchlock-server
//!
//! REST surface for fetch-and-lock and the external task lifecycle, served
//! with axum over an `EngineRegistry`.

use std::sync::Arc;

use axum::Router;
use axum::routing::post;
use tower_http::trace::TraceLayer;

use fetchlock_core::app::EngineRegistry;

pub mod auth;
pub mod dto;
pub mod error;
pub mod routes;
pub mod seed;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EngineRegistry>,
}

/// Routes for the default engine and the same routes under `/engine/{name}`.
pub fn router(registry: Arc<EngineRegistry>) -> Router {
    Router::new()
        .route("/external-task/fetchAndLock", post(routes::fetch_default))
        .route("/external-task/{id}/complete", post(routes::complete_default))
        .route("/external-task/{id}/failure", post(routes::failure_default))
        .route("/external-task/{id}/unlock", post(routes::unlock_default))
        .route("/external-task/{id}/extendLock", post(routes::extend_lock_default))
        .route("/engine/{name}/external-task/fetchAndLock", post(routes::fetch_named))
        .route("/engine/{name}/external-task/{id}/complete", post(routes::complete_named))
        .route("/engine/{name}/external-task/{id}/failure", post(routes::failure_named))
        .route("/engine/{name}/external-task/{id}/unlock", post(routes::unlock_named))
        .route(
            "/engine/{name}/external-task/{id}/extendLock",
            post(routes::extend_lock_named),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { registry })
}
