//! Framework-agnostic server entry: behavior options and `opened`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use subwire_core::message::MessageTransformer;

use crate::connection::{self, Connection};
use crate::hooks::{DefaultHooks, ServerHooks};
use crate::producer::SubscriptionFactory;
use crate::socket::Socket;

/// Default wait for `connection_init` after the socket opens.
pub const DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variable consulted for the production flag.
pub const PRODUCTION_ENV_VAR: &str = "SUBWIRE_ENV";

/// Behavior knobs for the transport core.
pub struct ServerOptions {
    pub(crate) factory: Arc<dyn SubscriptionFactory>,
    pub(crate) hooks: Arc<dyn ServerHooks>,
    pub(crate) connection_init_wait_timeout: Duration,
    pub(crate) replacer: Option<Arc<MessageTransformer>>,
    pub(crate) reviver: Option<Arc<MessageTransformer>>,
    pub(crate) production: bool,
}

impl ServerOptions {
    /// Options with default hooks and timers around the given factory.
    ///
    /// The production flag defaults to whether [`PRODUCTION_ENV_VAR`] is set
    /// to `"production"`.
    pub fn new(factory: impl SubscriptionFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            hooks: Arc::new(DefaultHooks),
            connection_init_wait_timeout: DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT,
            replacer: None,
            reviver: None,
            production: std::env::var(PRODUCTION_ENV_VAR).is_ok_and(|v| v == "production"),
        }
    }

    /// Install lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl ServerHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// How long to wait for `connection_init` before closing 4408.
    /// Zero disables the timer.
    #[must_use]
    pub fn connection_init_wait_timeout(mut self, timeout: Duration) -> Self {
        self.connection_init_wait_timeout = timeout;
        self
    }

    /// Key/value transformer applied while encoding outbound messages.
    #[must_use]
    pub fn replacer(
        mut self,
        replacer: impl Fn(&str, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        let replacer: Arc<MessageTransformer> = Arc::new(replacer);
        self.replacer = Some(replacer);
        self
    }

    /// Key/value transformer applied while decoding inbound messages.
    #[must_use]
    pub fn reviver(
        mut self,
        reviver: impl Fn(&str, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        let reviver: Arc<MessageTransformer> = Arc::new(reviver);
        self.reviver = Some(reviver);
        self
    }

    /// When set, internal error reasons on close frames are replaced with
    /// the literal `"Internal server error"`.
    #[must_use]
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// The transport server.
///
/// One instance serves any number of sockets; [`Server::opened`] wires each
/// accepted socket into a [`Connection`] the adapter drives.
pub struct Server {
    options: Arc<ServerOptions>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// Attach an upgraded socket.
    ///
    /// `extra` is opaque adapter context surfaced on the connection's
    /// [`crate::connection::ConnectionContext`]. The adapter must feed each
    /// inbound text frame to [`Connection::message`] and report the observed
    /// close via [`Connection::closed`].
    pub fn opened(&self, socket: Arc<dyn Socket>, extra: Value) -> Connection {
        connection::open(self.options.clone(), socket, extra)
    }
}
