//! The fleetrpc message envelope.
//!
//! A [`Message`] carries a payload through its life on the bus: built by a
//! client or agent, encoded by a [`SecurityProvider`], handed to a
//! [`Connector`], then decoded and validated on the receiving side.

mod error;
mod message;
mod security;

pub use error::MessageError;
pub use message::{create_reqid, Message, MessageOptions, MessageType, Payload};
pub use security::{Connector, RequestParts, SecurityProvider};
