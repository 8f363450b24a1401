//! Error types for the RPC task core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Error, Debug)]
pub enum RpcError {
    /// Server misconfiguration or broken invariant. Never caused by user
    /// input; registry lookup failures land here.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Failed to parse request source: {0}")]
    Parse(String),

    #[error("Unresolved reference: {0}")]
    Resolution(String),

    #[error("Execution failed: {0}")]
    Execution(#[from] anyhow::Error),

    #[error("Request killed by signal {signal}")]
    Killed { signal: i32 },
}

impl RpcError {
    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::Internal(_) => "INTERNAL_ERROR",
            RpcError::Parse(_) => "PARSE_ERROR",
            RpcError::Resolution(_) => "RESOLUTION_ERROR",
            RpcError::Execution(_) => "EXECUTION_ERROR",
            RpcError::Killed { .. } => "RPC_KILLED",
        }
    }

    /// True for failures caused by the request itself (bad source text,
    /// unknown references). Internal and killed errors are not user errors.
    pub fn is_user_error(&self) -> bool {
        matches!(self, RpcError::Parse(_) | RpcError::Resolution(_))
    }
}
