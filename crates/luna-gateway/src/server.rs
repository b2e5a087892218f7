// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Controller HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the API.

use std::time::Instant;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use luna_core::LunaError;
use luna_journal::Journal;
use luna_mother::Dispatcher;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Dispatcher,
    pub journal: Journal,
    pub auth: AuthConfig,
    /// Process start time for uptime calculation.
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(dispatcher: Dispatcher, journal: Journal, auth: AuthConfig) -> Self {
        Self {
            dispatcher,
            journal,
            auth,
            start_time: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Build the router:
/// - GET /health (public)
/// - GET /status/{request_id} (public, like the original client poll)
/// - POST /journal, GET /journal/{host}, GET /journal/{host}/_delete (auth)
/// - POST /tasks/{subsystem}, POST /ha/master (auth)
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();

    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/status/{request_id}", get(handlers::get_status))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/journal", post(handlers::post_journal))
        .route("/journal/{host}", get(handlers::get_journal))
        .route("/journal/{host}/_delete", get(handlers::delete_journal))
        .route("/tasks/{subsystem}", post(handlers::post_task))
        .route("/ha/master", post(handlers::post_master))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), LunaError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LunaError::Config(format!("failed to bind api to {addr}: {e}")))?;

    tracing::info!("api listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| LunaError::Internal(format!("api server error: {e}")))?;

    Ok(())
}
