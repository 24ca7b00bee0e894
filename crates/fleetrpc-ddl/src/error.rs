//! Error types for validators and DDL contracts.

/// Errors raised while validating a single value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorError {
    /// No validator plugin is registered under this name.
    #[error("Unknown validator: '{0}'.")]
    UnknownValidator(String),

    /// The value is not of the expected structural type.
    #[error("value should be a {expected}")]
    TypeMismatch { expected: String },

    /// The value is not a string matching the pattern.
    #[error("value should match {0}")]
    RegexMismatch(String),

    /// The validation pattern itself does not compile.
    #[error("invalid validation pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The value is not one of the permitted entries.
    #[error("value should be one of {0}")]
    NotInList(String),

    /// The value is longer than the declared maximum.
    #[error("Input string is longer than {0} character(s)")]
    TooLong(usize),

    /// A validator plugin rejected the value.
    #[error("{0}")]
    Plugin(String),
}

/// Errors raised while declaring or enforcing a DDL contract.
#[derive(Debug, thiserror::Error)]
pub enum DdlError {
    /// A request does not satisfy the declared contract.
    #[error("{0}")]
    Validation(String),

    /// The contract itself is malformed.
    #[error("{0}")]
    Declaration(String),

    /// A declarative DDL document could not be parsed.
    #[error("failed to parse DDL document: {0}")]
    Parse(#[from] toml::de::Error),

    /// A DDL file could not be read.
    #[error("failed to read DDL file: {0}")]
    Io(#[from] std::io::Error),
}
