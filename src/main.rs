use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod game;
mod log_sink;
mod registry;
mod room_actor;
mod state;
mod web;

use crate::config::load_settings;
use crate::error::Result as AppResult;
use crate::log_sink::LogSinkHandle;
use crate::registry::RoomRegistryHandle;
use crate::state::AppState;
use crate::web::run_server;

const REGISTRY_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=debug,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!(settings = ?app_settings, "Configuration loaded");

    let log_sink = LogSinkHandle::spawn(&app_settings.log_sink);
    let registry = RoomRegistryHandle::spawn(REGISTRY_BUFFER_SIZE, app_settings.game, log_sink);

    let app_state = AppState { registry };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
