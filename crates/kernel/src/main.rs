//! Agora forum REST server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method, header};
use tokio::runtime::Handle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use agora_kernel::config::Config;
use agora_kernel::db;
use agora_kernel::legacy::PgLegacyHandlers;
use agora_kernel::routes;
use agora_kernel::routes::posts::{TOTAL_HEADER, TOTAL_PAGES_HEADER};
use agora_kernel::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Agora forum kernel");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        port = config.port,
        anonymous_contributions = config.anonymous_contributions,
        site_url = %config.site_url,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config)
        .await
        .context("failed to create database pool")?;
    db::verify_schema(&pool)
        .await
        .context("forum schema check failed")?;
    info!("Connected to PostgreSQL");

    let handlers = Arc::new(PgLegacyHandlers::new(pool.clone(), Handle::current()));
    let state = AppState::new(&config, pool, handlers)
        .context("failed to initialize application state")?;

    let cors = build_cors_layer(&config);

    // Middleware layers (last added = first executed in request flow):
    // TraceLayer → CORS → route permissions → routes
    let app = routes::app(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    let exposed = [
        header::LOCATION,
        header::HeaderName::from_static(TOTAL_HEADER),
        header::HeaderName::from_static(TOTAL_PAGES_HEADER),
    ];

    if config.cors_allowed_origins.len() == 1 && config.cors_allowed_origins[0] == "*" {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .expose_headers(exposed)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .expose_headers(exposed)
            .allow_credentials(true)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
