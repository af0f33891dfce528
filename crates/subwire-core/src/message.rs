//! Wire-format messages for the subwire envelope.
//!
//! The transport treats payloads as opaque JSON: only the envelope is
//! validated (the `type` tag, operation `id` presence rules, payload
//! presence rules). Encoding and decoding accept optional key/value
//! transformers so callers can rewrite entries on the way in and out.

use serde_json::{Map, Value};
use thiserror::Error;

/// Error descriptors carried by an `error` message. Never empty on the wire.
pub type ErrorPayload = Vec<Value>;

/// Key/value transformer applied to object entries while encoding (the
/// "replacer") or decoding (the "reviver").
pub type MessageTransformer = dyn Fn(&str, Value) -> Value + Send + Sync;

/// A protocol message.
///
/// | Variant | Direction | Payload |
/// |---------|-----------|---------|
/// | `ConnectionInit` | client → server | optional connection params |
/// | `ConnectionAck` | server → client | optional |
/// | `Ping` / `Pong` | either | optional |
/// | `Subscribe` | client → server | required, opaque |
/// | `Next` | server → client | required, opaque |
/// | `Error` | server → client | non-empty error list |
/// | `Complete` | either | none |
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Begins the session; the payload carries connection params.
    ConnectionInit { payload: Option<Value> },
    /// Session accepted.
    ConnectionAck { payload: Option<Value> },
    /// Protocol-level liveness probe.
    Ping { payload: Option<Value> },
    /// Protocol-level liveness reply, echoing the probe payload.
    Pong { payload: Option<Value> },
    /// Starts an operation under a caller-chosen id.
    Subscribe { id: String, payload: Value },
    /// One intermediate result for an operation.
    Next { id: String, payload: Value },
    /// The operation failed.
    Error { id: String, payload: ErrorPayload },
    /// Ends an operation.
    Complete { id: String },
}

/// Failure while encoding or decoding a message.
///
/// Decoding distinguishes text that is not JSON at all from JSON that does
/// not form a valid protocol message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text frame was not valid JSON.
    #[error("message is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    /// The JSON parsed but is not a valid protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// The message could not be serialized.
    #[error("message is not serializable: {0}")]
    NotSerializable(#[source] serde_json::Error),
}

impl Message {
    /// The wire `type` tag of this message.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::ConnectionInit { .. } => "connection_init",
            Self::ConnectionAck { .. } => "connection_ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Subscribe { .. } => "subscribe",
            Self::Next { .. } => "next",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// The operation id, for id-bearing messages.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Subscribe { id, .. }
            | Self::Next { id, .. }
            | Self::Error { id, .. }
            | Self::Complete { id } => Some(id),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        let _ = map.insert(
            "type".to_owned(),
            Value::String(self.message_type().to_owned()),
        );
        match self {
            Self::ConnectionInit { payload }
            | Self::ConnectionAck { payload }
            | Self::Ping { payload }
            | Self::Pong { payload } => {
                if let Some(payload) = payload {
                    let _ = map.insert("payload".to_owned(), payload.clone());
                }
            }
            Self::Subscribe { id, payload } | Self::Next { id, payload } => {
                let _ = map.insert("id".to_owned(), Value::String(id.clone()));
                let _ = map.insert("payload".to_owned(), payload.clone());
            }
            Self::Error { id, payload } => {
                let _ = map.insert("id".to_owned(), Value::String(id.clone()));
                let _ = map.insert("payload".to_owned(), Value::Array(payload.clone()));
            }
            Self::Complete { id } => {
                let _ = map.insert("id".to_owned(), Value::String(id.clone()));
            }
        }
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        let Value::Object(mut map) = value else {
            return Err(CodecError::InvalidMessage(
                "message must be a JSON object".to_owned(),
            ));
        };
        let message_type = match map.get("type") {
            Some(Value::String(tag)) if !tag.is_empty() => tag.clone(),
            Some(_) => {
                return Err(CodecError::InvalidMessage(
                    "the 'type' property must be a non-empty string".to_owned(),
                ));
            }
            None => {
                return Err(CodecError::InvalidMessage(
                    "message is missing the 'type' property".to_owned(),
                ));
            }
        };
        match message_type.as_str() {
            "connection_init" => Ok(Self::ConnectionInit {
                payload: optional_payload(&mut map),
            }),
            "connection_ack" => Ok(Self::ConnectionAck {
                payload: optional_payload(&mut map),
            }),
            "ping" => Ok(Self::Ping {
                payload: optional_payload(&mut map),
            }),
            "pong" => Ok(Self::Pong {
                payload: optional_payload(&mut map),
            }),
            "subscribe" => Ok(Self::Subscribe {
                id: required_id(&map, "subscribe")?,
                payload: required_payload(&mut map, "subscribe")?,
            }),
            "next" => Ok(Self::Next {
                id: required_id(&map, "next")?,
                payload: required_payload(&mut map, "next")?,
            }),
            "error" => {
                let id = required_id(&map, "error")?;
                match map.remove("payload") {
                    Some(Value::Array(errors)) if !errors.is_empty() => {
                        Ok(Self::Error { id, payload: errors })
                    }
                    _ => Err(CodecError::InvalidMessage(
                        "'error' message requires a non-empty array 'payload'".to_owned(),
                    )),
                }
            }
            "complete" => Ok(Self::Complete {
                id: required_id(&map, "complete")?,
            }),
            other => Err(CodecError::InvalidMessage(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

fn required_id(map: &Map<String, Value>, message_type: &str) -> Result<String, CodecError> {
    match map.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(CodecError::InvalidMessage(format!(
            "'{message_type}' message requires a non-empty string 'id'"
        ))),
    }
}

/// A literal `null` payload is normalized to absent.
fn optional_payload(map: &mut Map<String, Value>) -> Option<Value> {
    match map.remove("payload") {
        None | Some(Value::Null) => None,
        Some(payload) => Some(payload),
    }
}

fn required_payload(
    map: &mut Map<String, Value>,
    message_type: &str,
) -> Result<Value, CodecError> {
    match map.remove("payload") {
        None | Some(Value::Null) => Err(CodecError::InvalidMessage(format!(
            "'{message_type}' message requires a 'payload' property"
        ))),
        Some(payload) => Ok(payload),
    }
}

/// Serialize a message to its wire text.
///
/// The replacer, when given, is applied top-down to every object entry of
/// the message tree before serialization. Absent optional fields are
/// omitted, never emitted as `null`.
pub fn encode(message: &Message, replacer: Option<&MessageTransformer>) -> Result<String, CodecError> {
    let mut value = message.to_value();
    if let Some(replacer) = replacer {
        value = apply_replacer(value, replacer);
    }
    serde_json::to_string(&value).map_err(CodecError::NotSerializable)
}

/// Parse and validate a message from its wire text.
///
/// The reviver, when given, is applied bottom-up to every object entry of
/// the parsed tree before envelope validation.
pub fn decode(text: &str, reviver: Option<&MessageTransformer>) -> Result<Message, CodecError> {
    let mut value: Value = serde_json::from_str(text).map_err(CodecError::NotJson)?;
    if let Some(reviver) = reviver {
        value = apply_reviver(value, reviver);
    }
    Message::from_value(value)
}

fn apply_replacer(value: Value, transform: &MessageTransformer) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, entry) in map {
                let entry = transform(&key, entry);
                let _ = out.insert(key, apply_replacer(entry, transform));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| apply_replacer(item, transform))
                .collect(),
        ),
        other => other,
    }
}

fn apply_reviver(value: Value, transform: &MessageTransformer) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, entry) in map {
                let entry = apply_reviver(entry, transform);
                let entry = transform(&key, entry);
                let _ = out.insert(key, entry);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| apply_reviver(item, transform))
                .collect(),
        ),
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
