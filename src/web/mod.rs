use axum::{
    Router,
    routing::{any, get},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::Result as AppResult;
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_PERIOD_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Keeps the origins that parse as header values; bad entries are logged and skipped.
fn parse_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(cors.origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = parse_origins(origins);
    if origins.is_empty() {
        tracing::info!("No CORS origins configured. Cross-origin requests are refused");
        return CorsLayer::new();
    }
    tracing::info!(cors.origins.count = origins.len(), "CORS origins configured");
    // The HTTP surface is read-only.
    CorsLayer::new()
        .allow_methods([http::Method::GET])
        .allow_origin(origins)
        .allow_headers([http::header::ACCEPT])
}

#[tracing::instrument(skip(app_state, server_config), fields(server.port = server_config.port))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_PERIOD_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| {
                WebError::InternalServerError("Invalid rate limiter configuration".to_string())
            })?,
    );

    let limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        let mut sweep = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
        loop {
            sweep.tick().await;
            limiter.retain_recent();
            tracing::trace!(rate_limiter.storage_size = limiter.len(), "Swept rate limiter");
        }
    });

    let app = Router::new()
        .route("/api/rooms", get(handlers::list_rooms_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().quality(CompressionLevel::Default))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer(&server_config.cors_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!(server.address = %addr, "HTTP server starting");

    // Peer addresses feed the rate limiter's key extractor.
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}
