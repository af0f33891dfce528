//! WebSocket session lifecycle — drives a single connected client from
//! upgrade through disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use subwire_core::close::CloseCode;

use crate::http::AppState;
use crate::keepalive::{run_keep_alive, KeepAliveResult, PongTracker};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::socket::{Socket, SocketError};

/// Close code reported when the socket ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// [`Socket`] over the write half of an axum WebSocket.
pub(crate) struct AxumSocket {
    protocol: &'static str,
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
    closed: AtomicBool,
}

impl AxumSocket {
    fn new(sink: SplitSink<WebSocket, WsMessage>, protocol: &'static str) -> Self {
        Self {
            protocol,
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Socket for AxumSocket {
    fn protocol(&self) -> &str {
        self.protocol
    }

    async fn send(&self, text: String) -> Result<(), SocketError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| SocketError::new(err.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.sink
            .lock()
            .await
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
            .await
            .map_err(|err| SocketError::new(err.to_string()))
    }

    async fn ping(&self) -> Result<(), SocketError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Ping(Vec::new().into()))
            .await
            .map_err(|err| SocketError::new(err.to_string()))
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Wires the socket into the transport core
/// 2. Dispatches inbound text frames in arrival order
/// 3. Runs the keep-alive driver on the same socket
/// 4. Reports the observed close and cleans up
#[instrument(skip_all, fields(client_id = %client_id))]
pub(crate) async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    selected_protocol: Option<&'static str>,
    state: AppState,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let socket: Arc<dyn Socket> =
        Arc::new(AxumSocket::new(ws_tx, selected_protocol.unwrap_or("")));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    state.tracker.add(client_id.clone(), socket.clone()).await;

    let conn = state
        .server
        .opened(socket.clone(), json!({ "clientId": client_id }));

    let pong = Arc::new(PongTracker::new());
    let keep_alive_cancel = CancellationToken::new();
    let mut keep_alive = tokio::spawn(run_keep_alive(
        socket.clone(),
        pong.clone(),
        Duration::from_millis(state.config.keep_alive_interval_ms),
        keep_alive_cancel.clone(),
    ));

    let shutdown = state.shutdown.token();

    let (close_code, close_reason) = loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                None => break (ABNORMAL_CLOSURE, String::new()),
                Some(Err(err)) => {
                    debug!(error = %err, "websocket read failed");
                    break (ABNORMAL_CLOSURE, String::new());
                }
                Some(Ok(WsMessage::Text(text))) => conn.message(text.as_str()).await,
                Some(Ok(WsMessage::Binary(_))) => {
                    conn.close(CloseCode::BadRequest, "Binary frames are not accepted").await;
                }
                // The transport answers pings on its own; both frames only
                // feed liveness here.
                Some(Ok(WsMessage::Ping(_))) => {}
                Some(Ok(WsMessage::Pong(_))) => pong.mark(),
                Some(Ok(WsMessage::Close(frame))) => {
                    break match frame {
                        Some(frame) => (frame.code, frame.reason.to_string()),
                        None => (NO_STATUS_RECEIVED, String::new()),
                    };
                }
            },
            result = &mut keep_alive => {
                break match result {
                    Ok(KeepAliveResult::TimedOut) => {
                        info!("keep-alive pong timeout, terminating socket");
                        // Abrupt termination: no close frame is sent.
                        (ABNORMAL_CLOSURE, "keep-alive timeout".to_owned())
                    }
                    Ok(KeepAliveResult::Cancelled) => (ABNORMAL_CLOSURE, String::new()),
                    Err(err) => {
                        debug!(error = %err, "keep-alive task failed");
                        (ABNORMAL_CLOSURE, String::new())
                    }
                };
            },
            () = shutdown.cancelled() => {
                let code = CloseCode::GoingAway;
                conn.close(code, code.default_reason()).await;
                break (code.code(), code.default_reason().to_owned());
            }
        }
    };

    keep_alive_cancel.cancel();
    keep_alive.abort();
    conn.closed(close_code, &close_reason).await;
    state.tracker.remove(&client_id).await;
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    info!(code = close_code, "client disconnected");
}
