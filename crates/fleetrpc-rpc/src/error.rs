use fleetrpc_types::StatusCode;

/// The failures an action can report. Each maps to one reply status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The action gave up.
    #[error("{0}")]
    Aborted(String),

    /// The agent has no such action.
    #[error("{0}")]
    UnknownAction(String),

    /// Required request data is missing.
    #[error("{0}")]
    MissingData(String),

    /// Request data is invalid.
    #[error("{0}")]
    InvalidData(String),

    /// An action explicitly reported an unknown failure.
    #[error("{0}")]
    Unknown(String),

    /// Anything not anticipated, including panics and authorization
    /// failures.
    #[error("{0}")]
    Unexpected(String),
}

impl RpcError {
    /// Returns the reply status code for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RpcError::Aborted(_) => StatusCode::Aborted,
            RpcError::UnknownAction(_) => StatusCode::UnknownAction,
            RpcError::MissingData(_) => StatusCode::MissingData,
            RpcError::InvalidData(_) => StatusCode::InvalidData,
            RpcError::Unknown(_) | RpcError::Unexpected(_) => StatusCode::Unexpected,
        }
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Aborted(_) => "aborted",
            RpcError::UnknownAction(_) => "unknown_action",
            RpcError::MissingData(_) => "missing_data",
            RpcError::InvalidData(_) => "invalid_data",
            RpcError::Unknown(_) => "unknown",
            RpcError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<fleetrpc_ddl::DdlError> for RpcError {
    fn from(err: fleetrpc_ddl::DdlError) -> Self {
        RpcError::InvalidData(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(RpcError::Aborted("x".into()).status_code().as_u8(), 1);
        assert_eq!(RpcError::UnknownAction("x".into()).status_code().as_u8(), 2);
        assert_eq!(RpcError::MissingData("x".into()).status_code().as_u8(), 3);
        assert_eq!(RpcError::InvalidData("x".into()).status_code().as_u8(), 4);
        assert_eq!(RpcError::Unknown("x".into()).status_code().as_u8(), 5);
        assert_eq!(RpcError::Unexpected("x".into()).status_code().as_u8(), 5);
    }

    #[test]
    fn ddl_errors_are_invalid_data() {
        let err: RpcError = fleetrpc_ddl::DdlError::Validation("Action x needs a y argument".into()).into();
        assert_eq!(err, RpcError::InvalidData("Action x needs a y argument".into()));
    }
}
