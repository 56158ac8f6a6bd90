use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod auth;
pub mod customization;
pub mod health;
pub mod metrics;

/// Upper bound on request bodies (two images plus form fields).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application routes, without the metrics endpoint or transport layers.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/customization/generate",
            post(customization::generate_garment),
        )
        .route(
            "/api/customization/preprocess",
            post(customization::preprocess_garment),
        )
        .route("/api/customization/tryon", post(customization::start_try_on))
        .route(
            "/api/customization/tryon/{job_id}",
            get(customization::get_try_on_status),
        )
        .route("/api/customization/jobs/{id}", get(customization::get_job))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
