//! Subscription producers — the user-supplied sources behind `subscribe`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use subwire_core::message::ErrorPayload;

use crate::connection::{ConnectionContext, Emitter};

/// Boxed error used at user-code boundaries (hooks, factories, producers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure returned by [`Emitter::next`].
#[derive(Debug, Error)]
pub enum EmitError {
    /// The operation completed or the connection closed; stop emitting.
    #[error("operation terminated")]
    Terminated,
    /// The result could not be delivered.
    #[error("emission failed: {0}")]
    Transport(#[source] BoxError),
}

/// An operation's emission source.
///
/// `start` drives the operation, pushing results through the emitter:
///
/// - `Ok(None)` — the operation finished; the server emits `complete`
/// - `Ok(Some(errors))` — a domain failure; the server emits `error`
/// - `Err(_)` — an internal failure; the connection closes with 4500
///
/// `stop` must be idempotent (the registry calls it once, but user code may
/// double-invoke from producer internals) and must cause a pending `start`
/// to settle promptly.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Run the operation until it finishes or `stop` is called.
    async fn start(&self, emit: Emitter) -> Result<Option<ErrorPayload>, BoxError>;

    /// Release the operation's resources and unblock `start`.
    async fn stop(&self);
}

/// Builds the [`Producer`] for one operation from its `subscribe` payload.
///
/// The payload is opaque to the transport; only the factory interprets it.
/// Errors are treated as internal and close the connection with 4500.
#[async_trait]
pub trait SubscriptionFactory: Send + Sync {
    async fn create(
        &self,
        ctx: &ConnectionContext,
        id: &str,
        payload: &Value,
    ) -> Result<Box<dyn Producer>, BoxError>;
}
