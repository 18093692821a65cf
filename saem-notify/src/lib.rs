//! saem-notify library - ensemble notification service
//!
//! Sends WhatsApp reminders to musicians about today's rehearsals and events,
//! and assignment notices when a coordinator publishes an item.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod engine;
pub mod messaging;
pub mod outbox;
pub mod repository;
pub mod scheduler;

use engine::NotificationEngine;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<NotificationEngine>,
}

impl AppState {
    pub fn new(engine: Arc<NotificationEngine>) -> Self {
        Self { engine }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
