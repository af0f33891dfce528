//! # subwire-server
//!
//! Server core of the subwire subscription transport: the per-connection
//! state machine and subscription multiplexer, plus an axum deployment.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `server` | Framework-agnostic entry: options + `opened(socket, extra)` |
//! | `connection` | Per-connection state machine, dispatch, emission ordering |
//! | `registry` | Operation id → reservation/running producer map |
//! | `producer` | `Producer` / `SubscriptionFactory` contracts |
//! | `hooks` | User lifecycle hooks |
//! | `keepalive` | Transport ping/pong liveness driver |
//! | `socket` | The contract an adapter must satisfy |
//! | `http` + `session` | Axum router, upgrade negotiation, session loop |
//! | `tracker` / `shutdown` | Live-socket map and graceful teardown |
//!
//! ## Data flow
//!
//! Inbound frames → `session` → `connection` (decode, dispatch) →
//! `registry` / producers. Producer emissions → `connection` → socket.
//! Keep-alive runs as a side channel on the same socket.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod health;
pub mod hooks;
pub mod http;
pub mod keepalive;
pub mod metrics;
pub mod producer;
pub mod registry;
pub mod server;
mod session;
pub mod shutdown;
pub mod socket;
pub mod tracker;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionContext, Emitter};
pub use hooks::{ConnectOutcome, DefaultHooks, PongAction, ServerHooks};
pub use http::{AppState, SubwireServer};
pub use producer::{BoxError, EmitError, Producer, SubscriptionFactory};
pub use server::{Server, ServerOptions, DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT};
pub use socket::{Socket, SocketError};
