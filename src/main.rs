mod classifier;
mod config;
mod db;
mod errors;
mod filters;
mod handlers;
mod inventory;
mod models;
mod optics_client;
mod optics_extract;
mod optics_fanout;
mod query_builder;
mod recurring;
mod snapshot;

use axum::{
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::inventory::InventoryService;
use crate::optics_client::PonProxyClient;
use crate::optics_fanout::OpticsFanout;
use crate::snapshot::SnapshotStore;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading (schema identifiers are validated here).
/// - Database connection.
/// - Option list cache and the PON proxy client.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fibermap_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url, &config.schema).await?;
    tracing::info!("Database connection pool established");

    // Create FDA/FDH option list cache (5 minute TTL)
    // The distinct scans are the most repeated queries the map issues
    let options_cache = Cache::builder()
        .time_to_live(Duration::from_secs(300))
        .max_capacity(1_000)
        .build();
    tracing::info!("Option list cache initialized");

    // Initialize PON proxy client and the per-OLT fan-out over it
    let proxy_client = PonProxyClient::new(
        config.pon_proxy_url.clone(),
        config.light.device_ip.clone(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize PON proxy client: {}", e))?;
    tracing::info!("PON proxy client initialized: {}", config.pon_proxy_url);

    let inventory = InventoryService::new(db.pool.clone(), config.schema.clone());
    let fanout = Arc::new(OpticsFanout::new(proxy_client));
    let snapshots = SnapshotStore::new();

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        config: config.clone(),
        inventory,
        fanout,
        snapshots,
        options_cache,
        auto_runner: Arc::new(Mutex::new(None)),
    });

    // Start the recurring fan-out at boot when an interval is configured
    if let Some(secs) = config.light.auto_interval_seconds {
        let handle = handlers::start_auto_runner(&app_state, secs);
        tracing::info!(
            "Recurring light level refresh enabled every {}s",
            handle.interval_seconds()
        );
        *app_state.auto_runner.lock().await = Some(handle);
    }

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
        // Inventory endpoints
        .route("/points", get(handlers::get_points))
        .route("/points/health", get(handlers::get_points_health))
        .route("/fda-options", get(handlers::fda_options))
        .route("/fdh-options", get(handlers::fdh_options))
        // Optical diagnostics endpoints
        .route("/light-config", get(handlers::light_config))
        .route("/light-level", post(handlers::post_light_level))
        .route("/light-level/latest", get(handlers::light_level_latest))
        .route("/light-level/auto", post(handlers::post_light_level_auto))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload (prevents memory exhaustion)
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20 (prevents DDoS)
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (probes bypass rate limiting)
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
