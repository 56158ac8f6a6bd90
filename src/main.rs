use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use tryon_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore},
    routes::{self, auth::JwtVerifier},
    services::{
        garments::DefaultGarments,
        generation::GenerationClient,
        job_store::{InMemoryJobStore, JobStore},
        pipeline::TryOnPipeline,
        rate_limiter::RateLimiter,
        transport::build_http_client,
        tryon_engine::{HttpTryOnEngine, TryOnEngineClient},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing tryon-pipeline server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "garment_generation_seconds",
        "Time to generate a garment from a prompt"
    );
    metrics::describe_counter!(
        "customization_jobs_total",
        "Total customization jobs created"
    );
    metrics::describe_counter!(
        "customization_jobs_failed",
        "Total customization jobs that failed"
    );
    metrics::describe_counter!("tryon_jobs_started", "Total try-on jobs started");
    metrics::describe_counter!(
        "tryon_jobs_reconciled",
        "Total try-on jobs moved to a terminal state from engine status"
    );
    metrics::describe_counter!(
        "rate_limit_denied_total",
        "Total requests rejected by the per-user rate limiter"
    );

    // Job store: PostgreSQL when configured, otherwise process memory
    let jobs: Arc<dyn JobStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let db_pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&db_pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgJobStore::new(db_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; customization jobs are kept in memory");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let http = build_http_client().expect("Failed to build HTTP client");

    // Initialize image generation client
    tracing::info!("Initializing image generation client");
    let generation_settings = config
        .generation_settings()
        .expect("Failed to configure image generation client");
    let generation = Arc::new(GenerationClient::new(http.clone(), generation_settings));

    // Initialize try-on engine client
    tracing::info!(base_url = %config.tryon_base_url, "Initializing try-on engine client");
    let engine: Arc<dyn TryOnEngineClient> =
        Arc::new(HttpTryOnEngine::new(http, &config.tryon_base_url));

    let pipeline = TryOnPipeline::new(generation, engine, jobs);
    let rate_limiter = RateLimiter::new(config.rate_limit_settings());
    let jwt = JwtVerifier::new(&config.jwt_secret);
    let default_garments = DefaultGarments::new(
        config.default_hoodie_image.as_deref(),
        config.default_tshirt_image.as_deref(),
    );

    // Create shared application state
    let state = AppState::new(pipeline, rate_limiter, jwt, default_garments);

    // Build API routes
    let app = Router::new()
        .merge(routes::api_router(state))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(routes::MAX_BODY_BYTES));

    tracing::info!("Starting tryon-pipeline on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
