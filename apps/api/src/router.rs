use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Red Salud scheduling API is running!" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api/appointments", appointment_routes(state.clone()))
}
