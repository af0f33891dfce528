//! Subprotocol negotiation for the WebSocket upgrade.

/// The canonical subprotocol token advertised during the WebSocket upgrade.
pub const GRAPHQL_TRANSPORT_WS_PROTOCOL: &str = "graphql-transport-ws";

/// Select the supported subprotocol from a collection of offered tokens.
///
/// Tokens are compared by exact equality after trimming surrounding
/// whitespace. The token is selected regardless of its position in the
/// offer; absence yields `None`.
pub fn select_protocol<'a, I>(offered: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a str>,
{
    offered
        .into_iter()
        .any(|token| token.trim() == GRAPHQL_TRANSPORT_WS_PROTOCOL)
        .then_some(GRAPHQL_TRANSPORT_WS_PROTOCOL)
}

/// Select the supported subprotocol from a raw `Sec-WebSocket-Protocol`
/// header value (a comma-separated token list).
pub fn select_protocol_header(header: &str) -> Option<&'static str> {
    select_protocol(header.split(','))
}
