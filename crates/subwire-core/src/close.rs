//! Close codes emitted on the wire and close-reason limits.

use std::fmt;

/// WebSocket close-reason byte budget (RFC 6455 control frames leave 123
/// bytes for the reason after the 2-byte status code).
pub const CLOSE_REASON_MAX_BYTES: usize = 123;

/// Close codes the transport emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// Server is shutting down.
    GoingAway,
    /// Malformed or unexpected message.
    BadRequest,
    /// `subscribe` received before the connection was acknowledged.
    Unauthorized,
    /// The connect hook refused the session.
    Forbidden,
    /// The socket was accepted without the supported subprotocol.
    SubprotocolNotAcceptable,
    /// No `connection_init` arrived within the configured window.
    ConnectionInitialisationTimeout,
    /// An operation id was reused while still active.
    SubscriberAlreadyExists,
    /// More than one `connection_init` on the same socket.
    TooManyInitialisationRequests,
    /// Unhandled producer or handler error.
    InternalServerError,
}

impl CloseCode {
    /// The numeric close code sent on the wire.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::GoingAway => 1001,
            Self::BadRequest => 4400,
            Self::Unauthorized => 4401,
            Self::Forbidden => 4403,
            Self::SubprotocolNotAcceptable => 4406,
            Self::ConnectionInitialisationTimeout => 4408,
            Self::SubscriberAlreadyExists => 4409,
            Self::TooManyInitialisationRequests => 4429,
            Self::InternalServerError => 4500,
        }
    }

    /// The reason used when the close site has nothing more specific.
    #[must_use]
    pub const fn default_reason(self) -> &'static str {
        match self {
            Self::GoingAway => "Going away",
            Self::BadRequest => "Bad request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::SubprotocolNotAcceptable => "Subprotocol not acceptable",
            Self::ConnectionInitialisationTimeout => "Connection initialisation timeout",
            Self::SubscriberAlreadyExists => "Subscriber already exists",
            Self::TooManyInitialisationRequests => "Too many initialisation requests",
            Self::InternalServerError => "Internal server error",
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.code()
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.default_reason())
    }
}

/// Cut a close reason down to the wire budget.
///
/// Reasons longer than [`CLOSE_REASON_MAX_BYTES`] are truncated at the last
/// character boundary that fits.
#[must_use]
pub fn limit_close_reason(reason: &str) -> &str {
    if reason.len() <= CLOSE_REASON_MAX_BYTES {
        return reason;
    }
    let mut end = CLOSE_REASON_MAX_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
