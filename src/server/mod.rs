//! HTTP server module for the log WebSocket and health endpoints.

pub mod routes;
pub mod state;
pub mod ws;

use crate::error::Error;
use crate::server::routes::health;
use crate::server::state::AppState;
use crate::server::ws::ws_handler;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Builds the router. Any origin may connect.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/logs", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves until the shutdown signal in `state` fires.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), Error> {
    let mut shutdown = state.shutdown.clone();
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(Error::Serve)?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
