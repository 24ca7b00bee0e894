use crate::MessageType;

/// Errors raised by the message type-state machine.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Unknown message type {0}")]
    UnknownType(String),

    #[error("Direct requests is not enabled using the direct_addressing config option")]
    DirectAddressingDisabled,

    #[error("Can only set type to direct_request if discovered_hosts have been set")]
    NoDiscoveredHosts,

    #[error("Can only store the expected msgid for reply messages")]
    NotAReply,

    #[error("Custom reply targets can only be set on requests")]
    ReplyTargetNotAllowed,

    #[error("Can only validate request messages")]
    NotARequest,

    #[error("Cannot encode {0} messages")]
    CannotEncode(MessageType),

    #[error("Cannot decode message type {0}")]
    CannotDecode(MessageType),

    /// The payload is not in the state the operation needs, e.g. encoding
    /// a message that was already encoded.
    #[error("{0}")]
    InvalidPayload(&'static str),

    #[error("callerid in request is not valid, suppressing reply to potentially forged request")]
    InvalidCallerId,

    /// The request is older than its time-to-live.
    #[error("Message {description} created at {msgtime} is {age} seconds old, TTL is {ttl}. Rejecting message.")]
    TtlExpired {
        description: String,
        msgtime: i64,
        age: i64,
        ttl: u64,
    },

    /// The request's filter does not select this node.
    #[error("Message {0} does not pass filters. Ignoring message.")]
    NotTargeted(String),

    #[error("Cannot encode a reply message if no request has been associated with it")]
    MissingRequest,

    /// Raised by a security provider.
    #[error("security provider error: {0}")]
    Security(String),

    /// Raised by a connector.
    #[error("connector error: {0}")]
    Connector(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl MessageError {
    /// Returns `true` for conditions a node on a shared bus should drop
    /// quietly: expired requests and requests not aimed at it.
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, MessageError::TtlExpired { .. } | MessageError::NotTargeted(_))
    }
}
