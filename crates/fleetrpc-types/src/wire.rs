//! Logical wire payloads.
//!
//! These are representation-agnostic: a security provider decides how an
//! [`Envelope`] is turned into bytes and back.

use crate::{Filter, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The decoded form of a request or reply.
///
/// For requests `body` holds `{action, agent, data}`; for replies it holds a
/// [`ReplyBody`]. Routing fields are optional because replies do not carry
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Creation time in seconds since the Unix epoch.
    pub msgtime: i64,
    /// Identity of the node that sent the message.
    pub senderid: String,
    /// Correlation id shared by a request and its replies.
    pub requestid: String,
    /// Authenticated caller, when the security provider established one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callerid: Option<String>,
    /// Request or reply body.
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Time-to-live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// The body of a reply: a status and the action's output data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyBody {
    pub statuscode: StatusCode,
    pub statusmsg: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}
