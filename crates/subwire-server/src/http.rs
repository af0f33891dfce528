//! Axum HTTP + WebSocket deployment of the transport.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tracing::{info, instrument, warn};

use subwire_core::close::CloseCode;
use subwire_core::protocol::{select_protocol_header, GRAPHQL_TRANSPORT_WS_PROTOCOL};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::server::{Server, ServerOptions};
use crate::session::run_ws_session;
use crate::shutdown::ShutdownCoordinator;
use crate::socket::SocketError;
use crate::tracker::ConnectionTracker;

/// Generates UUIDv7 request ids.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The transport core.
    pub server: Arc<Server>,
    /// Live-socket tracker.
    pub tracker: Arc<ConnectionTracker>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Deployment configuration.
    pub config: ServerConfig,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start timestamp.
    pub started_at: DateTime<Utc>,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
}

/// The subwire deployment: `/graphql` WebSocket upgrades plus health and
/// metrics endpoints.
pub struct SubwireServer {
    config: ServerConfig,
    server: Arc<Server>,
    tracker: Arc<ConnectionTracker>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl SubwireServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        options: ServerOptions,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            server: Arc::new(Server::new(options)),
            tracker: Arc::new(ConnectionTracker::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Build the axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            server: self.server.clone(),
            tracker: self.tracker.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            started_at: self.started_at,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/graphql", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Graceful teardown: close every live socket with 1001 "Going away"
    /// and stop the listener.
    ///
    /// Every socket is notified; the first close failure is returned after
    /// the sweep, per the cleanup error contract.
    pub async fn dispose(&self) -> Result<(), SocketError> {
        let code = CloseCode::GoingAway;
        let result = self
            .tracker
            .close_all(code.code(), code.default_reason())
            .await;
        self.shutdown.shutdown();
        result
    }

    /// The transport core.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// The live-socket tracker.
    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The deployment configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.tracker.count();
    Json(health::health_check(
        state.start_time,
        state.started_at,
        connections,
    ))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// GET /graphql — WebSocket upgrade handler.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.tracker.count();
    if current >= state.config.max_connections {
        warn!(
            current,
            max = state.config.max_connections,
            "connection limit reached, rejecting WebSocket upgrade"
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    // Clients may spread their offer over repeated header lines.
    let offered = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let selected = select_protocol_header(&offered);

    let client_id = uuid::Uuid::now_v7().to_string();
    let max_message_size = state.config.max_message_size;

    Ok(ws
        .protocols([GRAPHQL_TRANSPORT_WS_PROTOCOL])
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, client_id, selected, state)))
}
