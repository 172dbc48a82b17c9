//! HTTP and WebSocket handlers for the tubes server.

use crate::config::Config;
use crate::demo;
use crate::metrics::{self, MeteredHooks};
use anyhow::Result;
use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tubes_core::{Connector as _, Properties, Router as ChannelRouter};
use tubes_transport::Connector;

/// Shared server state.
pub struct AppState {
    /// Client registry and hook slot.
    pub connector: Arc<Connector>,
    /// The channel router.
    pub router: Arc<ChannelRouter>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create the connector and router, and register the demo channels if
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if a demo plugin fails to initialize.
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(Connector::new(metrics::error_sink()));
        let router = Arc::new(ChannelRouter::new(connector.error_sink()));
        connector.hook(Arc::new(MeteredHooks::new(Arc::clone(&router))));

        if config.demo.enabled {
            demo::register(&router)?;
            info!(channels = router.stats().channel_count, "Demo channels registered");
        }
        metrics::set_router_stats(router.stats());

        Ok(Self {
            connector,
            router,
            config,
        })
    }
}

/// Build the HTTP application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_stats_reporter(Arc::clone(&state.router), metrics::STATS_INTERVAL);
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Tubes server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": state.connector.registry().len(),
        "channels": stats.channel_count,
        "subscriptions": stats.subscription_count,
    }))
}

/// WebSocket upgrade handler.
///
/// The connection limit is checked before the upgrade request itself.
/// Query parameters become the client's initial properties.
async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let clients = state.connector.registry().len();
    if clients >= state.config.limits.max_connections {
        warn!(clients, "Connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let properties: Properties = query
        .into_iter()
        .map(|(key, value)| (key, value.into()))
        .collect();
    let connector = Arc::clone(&state.connector);
    let max_message_size = state.config.limits.max_message_size;

    ws.on_upgrade(move |socket| {
        tubes_transport::serve(socket, connector, properties, max_message_size)
    })
}
