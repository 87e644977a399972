//! paydrop — entry point.
//!
//! Starts the background intake scanner that polls the message feed for
//! payment commands and persists them to SQLite. Simultaneously exposes an
//! Axum REST API for claim listing, claim execution, and manual payment
//! recording.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paydrop::api::{self, ApiState};
use paydrop::chain::HttpChain;
use paydrop::claim::ClaimSettings;
use paydrop::config::Config;
use paydrop::db;
use paydrop::feed::HttpFeed;
use paydrop::scanner::{self, ScannerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared between the feed and chain clients.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let feed = Arc::new(HttpFeed::new(client.clone(), config.feed_url.clone()));
    let chain = Arc::new(HttpChain::new(client, config.chain_url.clone()));

    // ─── Background intake scanner ────────────────────────
    let scanner_state = Arc::new(ScannerState {
        pool: pool.clone(),
        config: config.clone(),
        feed,
    });
    tokio::spawn(scanner::run(scanner_state));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        pool,
        chain,
        settings: ClaimSettings::from_config(&config),
        duplicate_window_secs: config.duplicate_window_mins * 60,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/claims/:handle", get(api::list_claims))
        .route("/claims/:external_id/claim", post(api::claim_payment))
        .route("/payments", post(api::record_manual))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
