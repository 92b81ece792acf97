mod circuit_breaker;
mod config;
mod crypto;
mod db;
mod errors;
mod fill;
mod handlers;
mod matching_client;
mod models;
mod pg_store;
mod programs;
mod scoring;
mod store;
mod submission;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::crypto::{KeystreamCipher, PiiCipher};
use crate::db::Database;
use crate::matching_client::MatchingClient;
use crate::programs::FillProgramRegistry;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the matching
/// vendor client, the PII cipher, and the fill program registry, then starts
/// the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prescreen_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let stores = pg_store::pg_stores(db.pool.clone());

    let matching_client = MatchingClient::new(
        config.matching_base_url.clone(),
        config.matching_api_key.clone(),
    )?;
    tracing::info!("Matching client initialized: {}", config.matching_base_url);

    let cipher: Arc<dyn PiiCipher> = Arc::new(KeystreamCipher::from_hex_key(&config.pii_key_hex)?);

    let fill_registry = Arc::new(FillProgramRegistry::new(
        stores.clone(),
        matching_client.clone(),
    ));

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        stores,
        matching_client,
        fill_registry,
        cipher,
        config: config.clone(),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/prescreen/batches", post(handlers::submit_batch))
        .route("/api/v1/bureau-fill/preview", get(handlers::fill_preview))
        .route("/api/v1/bureau-fill/execute", post(handlers::fill_execute))
        .route("/api/v1/batches/:id", get(handlers::get_batch))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB covers a full 1000-record batch
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
