//! Shared types and constants for the fleetrpc workspace.
//!
//! This crate provides the foundational types used across all fleetrpc
//! crates: reply status codes, the process run mode, plugin kinds, the
//! request [`Filter`], the immutable [`RuntimeConfig`] value and the logical
//! wire payloads exchanged with a security provider.
//!
//! Nothing in this crate performs I/O. Crates higher in the graph take a
//! `RuntimeConfig` by value or reference instead of reading ambient state.

use serde::{Deserialize, Serialize};
use std::fmt;

mod config;
mod filter;
mod wire;

pub use config::{str_to_bool, RuntimeConfig};
pub use filter::{Capability, Filter, FilterKind, UnknownFilterKind};
pub use wire::{Envelope, ReplyBody};

/// Reply status codes returned by remote agents.
///
/// These are a stable, externally observed contract: changing the meaning
/// of a code is a breaking change for every deployed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum StatusCode {
    /// The action completed.
    Ok = 0,
    /// The action aborted itself.
    Aborted = 1,
    /// The agent has no such action.
    UnknownAction = 2,
    /// Required request data was missing.
    MissingData = 3,
    /// Request data was invalid or failed DDL validation.
    InvalidData = 4,
    /// Something failed while honouring a well-formed request.
    Unexpected = 5,
}

impl StatusCode {
    /// Returns the numeric code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric code to a `StatusCode`.
    ///
    /// Returns `None` for anything outside `0..=5`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Aborted),
            2 => Some(Self::UnknownAction),
            3 => Some(Self::MissingData),
            4 => Some(Self::InvalidData),
            5 => Some(Self::Unexpected),
            _ => None,
        }
    }

    /// Returns `true` only for [`StatusCode::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        code.as_u8()
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_u8(code).ok_or_else(|| format!("unknown status code: {}", code))
    }
}

/// Whether the current process is a server (agent host) or a client.
///
/// Passed explicitly to DDL loading: aggregate declarations are only
/// processed in client mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// An agent host answering requests.
    #[default]
    Server,
    /// A client issuing requests and summarising replies.
    Client,
}

/// The kinds of plugin a DDL can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// An RPC agent exposing actions.
    Agent,
    /// A discovery method resolving filters to identities.
    Discovery,
    /// A value validator.
    Validator,
    /// A client-side aggregate function.
    Aggregate,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Agent => write!(f, "agent"),
            PluginKind::Discovery => write!(f, "discovery"),
            PluginKind::Validator => write!(f, "validator"),
            PluginKind::Aggregate => write!(f, "aggregate"),
        }
    }
}
