//! The RPC layer: typed requests and replies, the [`Agent`] trait with the
//! [`handlemsg`] dispatcher, auditing, and client-side [`Stats`].

pub mod agent;
pub mod audit;
mod error;
mod reply;
mod request;
pub mod stats;

pub use agent::{agent_activated, handlemsg, validate_input, ActionHandler, ActionTable, Agent};
pub use audit::{Auditor, LogAuditor, NoopAuditor};
pub use error::RpcError;
pub use reply::Reply;
pub use request::Request;
pub use stats::{
    AggregateFailure, AggregateFailureKind, AggregateResult, ClientStats, Clock, Stats, SystemClock, Timer,
};
