//! Seams to the security provider and the connector.
//!
//! Concrete implementations (signing, encryption, middleware transports)
//! live outside this crate.

use crate::{Message, MessageError};
use fleetrpc_types::{Envelope, Filter};
use serde_json::Value;

/// The fields a security provider encodes into a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// Identity of the sending node.
    pub identity: &'a str,
    /// `{action, agent, data}` body.
    pub body: &'a Value,
    pub requestid: &'a str,
    pub filter: &'a Filter,
    pub agent: Option<&'a str>,
    pub collective: Option<&'a str>,
    pub ttl: u64,
}

/// Encodes, decodes and authenticates messages.
pub trait SecurityProvider: Send + Sync {
    fn encode_request(&self, parts: RequestParts<'_>) -> Result<Vec<u8>, MessageError>;

    fn encode_reply(
        &self,
        agent: Option<&str>,
        body: &Value,
        requestid: &str,
        callerid: Option<&str>,
    ) -> Result<Vec<u8>, MessageError>;

    /// Decodes the wire bytes of `message`.
    fn decode_msg(&self, message: &Message) -> Result<Envelope, MessageError>;

    fn valid_callerid(&self, callerid: Option<&str>) -> bool;

    /// Returns `true` if `filter` selects this node.
    fn validate_filter(&self, filter: &Filter) -> bool;
}

/// Hands encoded messages to the transport.
pub trait Connector: Send + Sync {
    fn publish(&self, message: &Message) -> Result<(), MessageError>;
}
