//! roomrelay server
//!
//! Real-time AI chat room relay: authenticated WebSocket connections,
//! per-room actors, persisted history, generative assistant turns.

mod api;
mod config;
mod directory;
mod error;
mod gateway;
mod history;
mod identity;
mod logging;
mod migrations;
mod paths;
mod persistence;
mod registry;
mod relay;
mod room_actor;
mod room_naming;
mod state;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get},
    Router,
};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{clear_rooms_handler, delete_room_handler, health_handler, list_rooms_handler};
use crate::config::Config;
use crate::directory::RoomDirectory;
use crate::gateway::{GenerationGateway, HttpGateway};
use crate::history::HistoryStore;
use crate::identity::TokenVerifier;
use crate::persistence::Store;
use crate::relay::Relay;
use crate::state::AppState;
use crate::websocket::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    paths::init_data_dir(config.data_dir.as_deref());
    paths::ensure_dirs()?;
    let _logging = logging::init_logging()?;

    info!(
        component = "server",
        event = "server.starting",
        bind = %config.bind,
        "Starting roomrelay server"
    );

    let store = Store::open(paths::db_path())?;

    let gateway: Arc<dyn GenerationGateway> = Arc::new(HttpGateway::new(
        config.gateway_api_key.clone(),
        config.gateway_base_url.clone(),
        config.gateway_model.clone(),
        config.title_model.clone(),
        config.image_endpoint.clone(),
    ));

    let directory = Arc::new(RoomDirectory::new(store.clone(), gateway.clone()));
    let history = Arc::new(HistoryStore::new(
        store.clone(),
        config.fallback_capacity,
        config.replay_limit,
    ));
    let relay = Relay::new(
        directory.clone(),
        history,
        gateway,
        Duration::from_secs(config.gateway_timeout_secs),
    );
    let verifier = TokenVerifier::new(
        &config.jwt_secret,
        Arc::new(store.clone()),
        Arc::new(store),
        config.skew_tolerance_secs,
    );

    let state = Arc::new(AppState {
        relay,
        verifier,
        directory,
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/rooms", get(list_rooms_handler).delete(clear_rooms_handler))
        .route("/rooms/{room_key}", delete(delete_room_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!(
        component = "server",
        event = "server.listening",
        bind = %config.bind,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
