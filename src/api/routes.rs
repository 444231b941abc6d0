//! API router configuration.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use crate::runtime::Runtime;

/// The main API router.
pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/workflows/validate", post(handlers::validate))
        .route("/workflows/compile", post(handlers::compile))
        .route("/workflows/execute", post(handlers::execute))
        .route("/workflows/executions", get(handlers::list_executions))
        .route("/workflows/executions/:id", get(handlers::get_execution))
        .route("/health", get(handlers::health))
        .with_state(runtime)
}
