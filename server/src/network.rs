//! HTTP and WebSocket front end: admission, upgrade and server lifecycle

use crate::admission::AdmissionRequest;
use crate::config::ServerConfig;
use crate::connection;
use crate::error::{HubError, ServerError};
use crate::hub::{Hub, HubHandle};
use crate::registry::EvictionReason;
use crate::scheduler::BroadcastScheduler;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    config: Arc<ServerConfig>,
}

/// Body of the `/health` endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub server_version: String,
    pub sessions: usize,
    pub clients: usize,
}

/// Routes: WebSocket endpoint on `/` and `/ws`, plus `/health`
pub fn router(hub: HubHandle, config: Arc<ServerConfig>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { hub, config })
}

/// Validates the handshake and admits the client before upgrading
///
/// Every rejection is answered with a plain HTTP error, so a refused client
/// never holds a socket or a registry entry.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
) -> Response {
    let request = match AdmissionRequest::from_query(&params, &state.config.registry.version) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected handshake: {}", e);
            return e.into_response();
        }
    };

    let admitted = match state.hub.admit(request).await {
        Ok(admitted) => admitted,
        Err(e) => return e.into_response(),
    };

    let client_id = admitted.client_id;
    let connection_config = state.config.connection;
    let cleanup = state.hub.clone();
    let hub = state.hub;

    ws.max_message_size(connection_config.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!("Upgrade failed for client {}: {}", client_id, e);
            if let Err(e) = cleanup.try_unregister(client_id, EvictionReason::Disconnected) {
                warn!("Could not release client {}: {}", client_id, e);
            }
        })
        .on_upgrade(move |socket| connection::serve(socket, admitted, hub, connection_config))
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(HealthReport {
            status: "ok",
            server_version: state.config.registry.version.clone(),
            sessions: stats.sessions,
            clients: stats.clients,
        })
        .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Sync server coordinating the hub, the broadcast scheduler and the listener
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and serves until ctrl-c
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` completes
    ///
    /// On shutdown the scheduler is stopped first, then the hub drains its
    /// pending requests and closes every client's outbound queue.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = Arc::new(self.config);
        let (hub, hub_task) = Hub::spawn(config.registry.clone(), config.hub_capacity);
        let scheduler = BroadcastScheduler::spawn(hub.clone(), config.tick_duration());

        info!(
            "Server {} listening on {} ({} Hz, max {} clients)",
            config.registry.version,
            listener.local_addr()?,
            config.tick_rate,
            config.registry.max_clients
        );

        let app = router(hub.clone(), Arc::clone(&config));
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        let ticks = scheduler.stop().await;
        match hub.shutdown().await {
            Ok(()) | Err(HubError::Closed) => {}
            Err(e) => warn!("Hub shutdown request failed: {}", e),
        }
        if let Err(e) = hub_task.await {
            error!("Hub task panicked: {}", e);
        }

        info!("Server stopped after {} broadcast ticks", ticks);
        result.map_err(ServerError::Io)
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
