//! The socket contract an adapter must satisfy.

use async_trait::async_trait;
use thiserror::Error;

/// Failure surfaced by a [`Socket`] operation.
#[derive(Debug, Error)]
#[error("socket error: {message}")]
pub struct SocketError {
    message: String,
}

impl SocketError {
    /// Wrap a transport failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A duplex WebSocket as seen by the transport core.
///
/// Implementations must deliver text frames in order and support a one-shot
/// close with code and reason. `send` settles once the frame has been handed
/// to the transport; the core relies on that for per-operation emission
/// ordering.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// The subprotocol selected during the upgrade. Empty when none was.
    fn protocol(&self) -> &str;

    /// Send one text frame.
    async fn send(&self, text: String) -> Result<(), SocketError>;

    /// Close the socket with a code and reason. Repeat closes are no-ops.
    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError>;

    /// Send a transport-level ping frame.
    ///
    /// Used by the keep-alive driver; this is not a protocol `ping` message.
    async fn ping(&self) -> Result<(), SocketError>;
}
