//! Plugin contracts for fleetrpc.
//!
//! This crate holds the [`Validator`] dispatch with its time-bounded plugin
//! cache, the [`Ddl`] contract model with its builder, and the loader for
//! declarative TOML DDL documents.

pub mod ddl;
pub mod document;
pub mod error;
pub mod validator;

pub use ddl::{
    ActionBuilder, ActionSpec, AggregateCall, AggregateFunction, AggregateRegistry,
    BuiltinAggregates, Ddl, DisplayPreference, InputKey, InputProperties, InputSpec, InputType,
    Metadata, OutputSpec, SummarizeBuilder, DEFAULT_AGENT_TIMEOUT,
};
pub use document::DdlLoader;
pub use error::{DdlError, ValidatorError};
pub use validator::{
    BuiltinValidators, PatternCache, TypeTag, ValidationRule, Validator, ValidatorCache, ValidatorPlugin,
    ValidatorRegistry, VALIDATOR_REFRESH_SECS,
};
