//! User hook surface invoked around the connection lifecycle.

use async_trait::async_trait;
use serde_json::Value;

use subwire_core::message::ErrorPayload;

use crate::connection::ConnectionContext;
use crate::producer::{BoxError, Producer};

/// Outcome of [`ServerHooks::on_connect`].
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectOutcome {
    /// Accept the session; `connection_ack` carries no payload.
    Accept,
    /// Accept the session; `connection_ack` carries this payload.
    AcceptWithPayload(Value),
    /// Refuse the session; the socket closes 4403 Forbidden.
    Reject,
}

/// Reply decision for a protocol `ping`.
#[derive(Clone, Debug, PartialEq)]
pub enum PongAction {
    /// Send a `pong` with this payload.
    Reply(Option<Value>),
    /// Send nothing; the hook owns the reply.
    Suppress,
}

/// Lifecycle hooks a deployment can supply.
///
/// Every method has a default implementation, so implementors override only
/// what they need. Hook errors are treated as internal failures and close
/// the connection with 4500.
#[async_trait]
pub trait ServerHooks: Send + Sync {
    /// Invoked on `connection_init`, before the ack is sent.
    async fn on_connect(&self, ctx: &ConnectionContext) -> Result<ConnectOutcome, BoxError> {
        let _ = ctx;
        Ok(ConnectOutcome::Accept)
    }

    /// Invoked when an acknowledged connection closes.
    async fn on_disconnect(&self, ctx: &ConnectionContext, code: u16, reason: &str) {
        let _ = (ctx, code, reason);
    }

    /// Invoked when any connection closes, acknowledged or not.
    async fn on_close(&self, ctx: &ConnectionContext, code: u16, reason: &str) {
        let _ = (ctx, code, reason);
    }

    /// Inspect or refuse a `subscribe` before the factory runs.
    ///
    /// Returning `Some(errors)` emits an `error` message for the id instead
    /// of starting the operation; the connection stays open.
    async fn on_subscribe(
        &self,
        ctx: &ConnectionContext,
        id: &str,
        payload: &Value,
    ) -> Result<Option<ErrorPayload>, BoxError> {
        let _ = (ctx, id, payload);
        Ok(None)
    }

    /// Wrap or replace the producer before it starts.
    async fn on_operation(
        &self,
        ctx: &ConnectionContext,
        id: &str,
        producer: Box<dyn Producer>,
    ) -> Result<Box<dyn Producer>, BoxError> {
        let _ = (ctx, id);
        Ok(producer)
    }

    /// Transform a result payload before it is sent as `next`.
    async fn on_next(
        &self,
        ctx: &ConnectionContext,
        id: &str,
        payload: Value,
    ) -> Result<Value, BoxError> {
        let _ = (ctx, id);
        Ok(payload)
    }

    /// Transform error descriptors before they are sent as `error`.
    async fn on_error(
        &self,
        ctx: &ConnectionContext,
        id: &str,
        errors: ErrorPayload,
    ) -> Result<ErrorPayload, BoxError> {
        let _ = (ctx, id);
        Ok(errors)
    }

    /// Invoked once per started operation after it settles, on every
    /// completion path (normal end, operation error, client complete,
    /// connection close).
    async fn on_complete(&self, ctx: &ConnectionContext, id: &str) {
        let _ = (ctx, id);
    }

    /// Invoked on a protocol `ping`.
    ///
    /// The default replies with a `pong` echoing the payload. Return
    /// [`PongAction::Suppress`] to take over the reply entirely.
    async fn on_ping(&self, ctx: &ConnectionContext, payload: Option<Value>) -> PongAction {
        let _ = ctx;
        PongAction::Reply(payload)
    }

    /// Invoked on a protocol `pong`.
    async fn on_pong(&self, ctx: &ConnectionContext, payload: Option<Value>) {
        let _ = (ctx, payload);
    }
}

/// Hooks that accept everything and do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

#[async_trait]
impl ServerHooks for DefaultHooks {}
