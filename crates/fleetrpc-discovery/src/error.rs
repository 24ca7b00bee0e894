use fleetrpc_types::FilterKind;

/// Errors raised while choosing a discovery method or running discovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Limit has to be an integer")]
    InvalidLimit,

    #[error("Unknown discovery method {0}")]
    UnknownMethod(String),

    #[error("Custom discovery methods require direct addressing mode")]
    DirectAddressingRequired,

    #[error("Cannot use {} filters while using the '{method}' discovery method", kind.label())]
    UnsupportedFilter { method: String, kind: FilterKind },

    /// Failure reported by the discovery backend itself.
    #[error("{0}")]
    Method(String),
}
