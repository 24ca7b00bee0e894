//! Discovery method selection and capability negotiation.

mod discovery;
mod error;

pub use discovery::{ClientOptions, Discovery, DiscoveryLimit, DiscoveryMethod, DiscoveryRegistry};
pub use error::DiscoveryError;
