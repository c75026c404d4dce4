//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::kernel::{Seeder, StateStore, WorkQueue};
use crate::server::routes::{health_handler, seed_handler, status_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub seeder: Arc<Seeder>,
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/seed", post(seed_handler))
        .route("/status", get(status_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
