use std::sync::Arc;

use crate::routes::auth::JwtVerifier;
use crate::services::{
    garments::DefaultGarments, pipeline::TryOnPipeline, rate_limiter::RateLimiter,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<TryOnPipeline>,
    pub rate_limiter: Arc<RateLimiter>,
    pub jwt: Arc<JwtVerifier>,
    pub default_garments: Arc<DefaultGarments>,
}

impl AppState {
    pub fn new(
        pipeline: TryOnPipeline,
        rate_limiter: RateLimiter,
        jwt: JwtVerifier,
        default_garments: DefaultGarments,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            rate_limiter: Arc::new(rate_limiter),
            jwt: Arc::new(jwt),
            default_garments: Arc::new(default_garments),
        }
    }
}
