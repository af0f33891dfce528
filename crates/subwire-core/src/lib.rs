//! # subwire-core
//!
//! Protocol vocabulary for the subwire subscription transport — the
//! `graphql-transport-ws` envelope with pluggable payloads.
//!
//! This crate provides the shared vocabulary the server crate depends on:
//!
//! - **Messages**: the [`message::Message`] enum covering the eight envelope
//!   types, plus the codec with caller-configurable replacer/reviver
//!   transformers
//! - **Subprotocol**: the canonical token and negotiation helpers
//! - **Close codes**: the [`close::CloseCode`] vocabulary and close-reason
//!   limits
//! - **Logging**: the `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod close;
pub mod logging;
pub mod message;
pub mod protocol;

pub use close::{limit_close_reason, CloseCode, CLOSE_REASON_MAX_BYTES};
pub use message::{decode, encode, CodecError, ErrorPayload, Message, MessageTransformer};
pub use protocol::{select_protocol, select_protocol_header, GRAPHQL_TRANSPORT_WS_PROTOCOL};
