//! Deployment configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP/WebSocket deployment.
///
/// Protocol behavior (init timeout, transformers, hooks) lives on
/// [`crate::server::ServerOptions`]; this covers the listener itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Keep-alive ping interval in milliseconds. Zero disables keep-alive.
    pub keep_alive_interval_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 50,
            keep_alive_interval_ms: 12_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}
