//! Per-connection protocol state machine and message dispatch.
//!
//! One [`Connection`] owns the full lifecycle of a socket: the
//! initialisation handshake, operation multiplexing, cancellation, and
//! teardown. The adapter feeds inbound text frames to
//! [`Connection::message`] in arrival order and reports the observed close
//! via [`Connection::closed`]; everything else happens here.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use subwire_core::close::{limit_close_reason, CloseCode};
use subwire_core::message::{self, Message};
use subwire_core::protocol::GRAPHQL_TRANSPORT_WS_PROTOCOL;

use crate::hooks::{ConnectOutcome, PongAction};
use crate::metrics::{
    SUBSCRIPTIONS_ACTIVE, SUBSCRIPTIONS_STARTED_TOTAL, WS_CLOSES_TOTAL,
    WS_MESSAGES_RECEIVED_TOTAL,
};
use crate::producer::{BoxError, EmitError, Producer};
use crate::registry::{RemovedEntry, RunningSubscription, SubscriptionRegistry};
use crate::server::ServerOptions;
use crate::socket::Socket;

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    /// Socket open, no `connection_init` yet.
    AwaitingInit,
    /// `connection_init` received, connect hook in progress.
    Acknowledging,
    /// `connection_ack` sent; `subscribe` is legal.
    Acknowledged,
    /// Terminal. Inbound is discarded, outbound is a no-op.
    Closed,
}

/// Read-only connection context surfaced to hooks and factories.
pub struct ConnectionContext {
    connection_params: Mutex<Option<Value>>,
    init_received: AtomicBool,
    acknowledged: AtomicBool,
    extra: Value,
    registry: Arc<SubscriptionRegistry>,
}

impl ConnectionContext {
    fn new(extra: Value, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            connection_params: Mutex::new(None),
            init_received: AtomicBool::new(false),
            acknowledged: AtomicBool::new(false),
            extra,
            registry,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(extra: Value, registry: Arc<SubscriptionRegistry>) -> Self {
        Self::new(extra, registry)
    }

    /// Params carried by `connection_init`, once received.
    pub fn connection_params(&self) -> Option<Value> {
        self.connection_params.lock().clone()
    }

    /// Whether `connection_init` has been received.
    pub fn connection_init_received(&self) -> bool {
        self.init_received.load(Ordering::Relaxed)
    }

    /// Whether the connection has been acknowledged.
    pub fn acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Opaque adapter context handed to `opened`.
    pub fn extra(&self) -> &Value {
        &self.extra
    }

    /// Ids of operations currently reserved or running.
    pub fn subscription_ids(&self) -> Vec<String> {
        self.registry.snapshot_ids()
    }
}

pub(crate) struct ConnectionInner {
    options: Arc<ServerOptions>,
    socket: Arc<dyn Socket>,
    state: Mutex<ConnectionState>,
    ctx: Arc<ConnectionContext>,
    registry: Arc<SubscriptionRegistry>,
    init_timer: CancellationToken,
    cleaned: AtomicBool,
}

/// Handle to one open connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

/// Wire a freshly accepted socket into a connection.
pub(crate) fn open(
    options: Arc<ServerOptions>,
    socket: Arc<dyn Socket>,
    extra: Value,
) -> Connection {
    let registry = Arc::new(SubscriptionRegistry::new());
    let ctx = Arc::new(ConnectionContext::new(extra, registry.clone()));
    let inner = Arc::new(ConnectionInner {
        options,
        socket,
        state: Mutex::new(ConnectionState::AwaitingInit),
        ctx,
        registry,
        init_timer: CancellationToken::new(),
        cleaned: AtomicBool::new(false),
    });

    if inner.socket.protocol() != GRAPHQL_TRANSPORT_WS_PROTOCOL {
        let conn = inner.clone();
        drop(tokio::spawn(async move {
            conn.close_with(
                CloseCode::SubprotocolNotAcceptable,
                CloseCode::SubprotocolNotAcceptable.default_reason(),
            )
            .await;
        }));
        return Connection { inner };
    }

    let timeout = inner.options.connection_init_wait_timeout;
    if !timeout.is_zero() {
        let conn = inner.clone();
        let cancelled = inner.init_timer.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if !conn.ctx.connection_init_received() {
                        conn.close_with(
                            CloseCode::ConnectionInitialisationTimeout,
                            CloseCode::ConnectionInitialisationTimeout.default_reason(),
                        )
                        .await;
                    }
                }
            }
        }));
    }

    Connection { inner }
}

impl Connection {
    /// Dispatch one inbound text frame.
    ///
    /// Protocol violations and internal errors close the socket with the
    /// appropriate code; nothing escapes to the adapter. Frames arriving
    /// after the connection is closed are discarded.
    pub async fn message(&self, data: &str) {
        if let Err(err) = ConnectionInner::handle_message(&self.inner, data).await {
            self.inner.internal_error(err).await;
        }
    }

    /// Close the socket from the adapter side (binary frames, shutdown).
    pub async fn close(&self, code: CloseCode, reason: &str) {
        self.inner.close_with(code, reason).await;
    }

    /// Run asynchronous cleanup after the socket has been observed closed:
    /// stop every operation, await each completion, then fire the
    /// disconnect/close hooks.
    pub async fn closed(&self, code: u16, reason: &str) {
        self.inner.cleanup(code, reason).await;
    }

    /// The connection's context.
    pub fn context(&self) -> Arc<ConnectionContext> {
        self.inner.ctx.clone()
    }
}

impl ConnectionInner {
    fn is_closed(&self) -> bool {
        *self.state.lock() == ConnectionState::Closed
    }

    async fn handle_message(this: &Arc<Self>, data: &str) -> Result<(), BoxError> {
        if this.is_closed() {
            return Ok(());
        }
        counter!(WS_MESSAGES_RECEIVED_TOTAL).increment(1);

        let message = match message::decode(data, this.options.reviver.as_deref()) {
            Ok(message) => message,
            Err(err) => {
                let reason = err.to_string();
                this.close_with(CloseCode::BadRequest, limit_close_reason(&reason))
                    .await;
                return Ok(());
            }
        };

        match message {
            Message::ConnectionInit { payload } => this.handle_connection_init(payload).await,
            Message::Ping { payload } => this.handle_ping(payload).await,
            Message::Pong { payload } => {
                this.options.hooks.on_pong(&this.ctx, payload).await;
                Ok(())
            }
            Message::Subscribe { id, payload } => {
                Self::handle_subscribe(this, id, payload).await
            }
            Message::Complete { id } => this.handle_complete(&id).await,
            other => {
                // connection_ack / next / error are never valid server-bound
                let reason = format!("Unexpected message of type '{}'", other.message_type());
                this.close_with(CloseCode::BadRequest, &reason).await;
                Ok(())
            }
        }
    }

    async fn handle_connection_init(&self, payload: Option<Value>) -> Result<(), BoxError> {
        let duplicate = {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::AwaitingInit => {
                    *state = ConnectionState::Acknowledging;
                    false
                }
                ConnectionState::Closed => return Ok(()),
                _ => true,
            }
        };
        if duplicate {
            self.close_with(
                CloseCode::TooManyInitialisationRequests,
                CloseCode::TooManyInitialisationRequests.default_reason(),
            )
            .await;
            return Ok(());
        }

        // The init timer must not fire while the connect hook runs.
        self.init_timer.cancel();
        *self.ctx.connection_params.lock() = payload;
        self.ctx.init_received.store(true, Ordering::Relaxed);

        match self.options.hooks.on_connect(&self.ctx).await? {
            ConnectOutcome::Reject => {
                self.close_with(CloseCode::Forbidden, CloseCode::Forbidden.default_reason())
                    .await;
            }
            outcome => {
                let payload = match outcome {
                    ConnectOutcome::AcceptWithPayload(payload) => Some(payload),
                    _ => None,
                };
                self.send_message(Message::ConnectionAck { payload }).await?;
                let mut state = self.state.lock();
                if *state == ConnectionState::Acknowledging {
                    *state = ConnectionState::Acknowledged;
                    drop(state);
                    self.ctx.acknowledged.store(true, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    async fn handle_ping(&self, payload: Option<Value>) -> Result<(), BoxError> {
        match self.options.hooks.on_ping(&self.ctx, payload).await {
            PongAction::Reply(payload) => self.send_message(Message::Pong { payload }).await,
            PongAction::Suppress => Ok(()),
        }
    }

    async fn handle_subscribe(
        this: &Arc<Self>,
        id: String,
        payload: Value,
    ) -> Result<(), BoxError> {
        if !this.ctx.acknowledged() {
            this.close_with(
                CloseCode::Unauthorized,
                CloseCode::Unauthorized.default_reason(),
            )
            .await;
            return Ok(());
        }

        if !this.registry.reserve(&id) {
            let reason = format!("Subscriber for {id} already exists");
            this.close_with(
                CloseCode::SubscriberAlreadyExists,
                limit_close_reason(&reason),
            )
            .await;
            return Ok(());
        }

        counter!(SUBSCRIPTIONS_STARTED_TOTAL).increment(1);

        // The subscribe is handled once the reservation is in place; the
        // factory and producer run on their own task so a long-lived
        // operation cannot block inbound dispatch.
        let conn = this.clone();
        drop(tokio::spawn(async move {
            if let Err(err) = ConnectionInner::drive_subscription(&conn, &id, payload).await {
                conn.internal_error(err).await;
            }
        }));
        Ok(())
    }

    async fn drive_subscription(
        this: &Arc<Self>,
        id: &str,
        payload: Value,
    ) -> Result<(), BoxError> {
        if let Some(errors) = this
            .options
            .hooks
            .on_subscribe(&this.ctx, id, &payload)
            .await?
        {
            // The operation was refused; the connection stays open. Emit
            // only if the reservation had not been torn down meanwhile.
            if this.registry.remove(id).was_present() {
                this.send_message(Message::Error {
                    id: id.to_owned(),
                    payload: errors,
                })
                .await?;
            }
            return Ok(());
        }

        let producer = this.options.factory.create(&this.ctx, id, &payload).await?;
        let producer = this
            .options
            .hooks
            .on_operation(&this.ctx, id, producer)
            .await?;
        let producer: Arc<dyn Producer> = Arc::from(producer);

        let finished = CancellationToken::new();
        if !this
            .registry
            .install(id, RunningSubscription::new(producer.clone(), finished.clone()))
        {
            // The client completed the operation or the connection closed
            // while the factory was constructing; release the producer
            // without ever starting it.
            producer.stop().await;
            return Ok(());
        }
        gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);

        // Cancelled when this scope exits, on every path, so teardown never
        // waits on a settled operation.
        let _finished_guard = finished.drop_guard();

        let emitter = Emitter {
            conn: this.clone(),
            id: id.to_owned(),
        };
        let outcome = producer.start(emitter).await;

        // Registry cleanup is unconditional on the settle path; it must not
        // depend on the sends or closes below reaching the socket.
        let held = this.registry.remove(id).was_present();
        if held {
            gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
        }

        match outcome {
            Ok(done) => {
                if held {
                    match done {
                        None => {
                            this.send_message(Message::Complete { id: id.to_owned() })
                                .await?;
                        }
                        Some(errors) => {
                            let errors =
                                this.options.hooks.on_error(&this.ctx, id, errors).await?;
                            this.send_message(Message::Error {
                                id: id.to_owned(),
                                payload: errors,
                            })
                            .await?;
                        }
                    }
                }
                this.options.hooks.on_complete(&this.ctx, id).await;
                Ok(())
            }
            Err(err) if held => Err(err),
            Err(err) => {
                debug!(id, error = %err, "producer failed after its operation was dropped");
                Ok(())
            }
        }
    }

    async fn handle_complete(&self, id: &str) -> Result<(), BoxError> {
        // Removing a bare reservation is enough: the factory task observes
        // the missing sentinel and releases its producer without starting it.
        if let RemovedEntry::Running(running) = self.registry.remove(id) {
            gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
            running.stop_and_wait().await;
        }
        // Never answer a client `complete` with a server `complete`.
        Ok(())
    }

    async fn send_message(&self, message: Message) -> Result<(), BoxError> {
        if self.is_closed() {
            // Outbound sends on a closed connection are no-ops.
            return Ok(());
        }
        let text = message::encode(&message, self.options.replacer.as_deref())?;
        self.socket.send(text).await?;
        Ok(())
    }

    async fn close_with(&self, code: CloseCode, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        counter!(WS_CLOSES_TOTAL, "code" => code.code().to_string()).increment(1);
        debug!(code = code.code(), reason, "closing connection");
        if let Err(err) = self.socket.close(code.code(), reason).await {
            warn!(error = %err, "close frame could not be sent");
        }
    }

    async fn internal_error(&self, err: BoxError) {
        warn!(error = %err, "internal error on connection");
        let reason = if self.options.production {
            CloseCode::InternalServerError.default_reason().to_owned()
        } else {
            limit_close_reason(&err.to_string()).to_owned()
        };
        self.close_with(CloseCode::InternalServerError, &reason).await;
    }

    async fn cleanup(&self, code: u16, reason: &str) {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = ConnectionState::Closed;
        self.init_timer.cancel();

        for id in self.registry.snapshot_ids() {
            if let RemovedEntry::Running(running) = self.registry.remove(&id) {
                gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
                // Waits until the drive task has run the completion hook.
                running.stop_and_wait().await;
            }
        }

        if self.ctx.acknowledged() {
            self.options
                .hooks
                .on_disconnect(&self.ctx, code, reason)
                .await;
        }
        self.options.hooks.on_close(&self.ctx, code, reason).await;
    }
}

/// Capability scoped to one operation for pushing results to the client.
///
/// Sends are awaited in call order, so results for one id reach the wire in
/// emission order; results for different ids may interleave arbitrarily.
#[derive(Clone)]
pub struct Emitter {
    conn: Arc<ConnectionInner>,
    id: String,
}

impl Emitter {
    /// The operation id this emitter is bound to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Push one result as a `next` message.
    ///
    /// Returns [`EmitError::Terminated`] once the operation has completed or
    /// the connection closed; producers should stop emitting when they see
    /// it.
    pub async fn next(&self, payload: Value) -> Result<(), EmitError> {
        if !self.conn.registry.contains(&self.id) {
            return Err(EmitError::Terminated);
        }
        let payload = self
            .conn
            .options
            .hooks
            .on_next(&self.conn.ctx, &self.id, payload)
            .await
            .map_err(EmitError::Transport)?;
        self.conn
            .send_message(Message::Next {
                id: self.id.clone(),
                payload,
            })
            .await
            .map_err(EmitError::Transport)
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("id", &self.id).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
