use cuwhapp_core::{ActionResponse, CoreError, ErrorCategory};
use cuwhapp_proto::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Failures to reach a host or to keep a session to it alive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to spawn ssh client: {0}")]
    Spawn(String),
    #[error("authentication rejected by {0}")]
    Auth(String),
    #[error("host key verification failed for {0}")]
    HostKey(String),
    #[error("host {0} unreachable")]
    Unreachable(String),
    #[error("connection to {0} reset")]
    ConnectionReset(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether another attempt can plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_)
                | TransportError::ConnectionReset(_)
                | TransportError::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Remote command failed with exit code {exit_code}: {stderr}")]
    Remote { exit_code: i32, stderr: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("Provision timeout: {0}")]
    ProvisionTimeout(String),
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("Outcome unknown: {0}")]
    Unknown(String),
}

impl OrchestratorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Transport(_) => ErrorCategory::Transport,
            OrchestratorError::Remote { .. } => ErrorCategory::Remote,
            OrchestratorError::NotFound(_) => ErrorCategory::NotFound,
            OrchestratorError::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            OrchestratorError::CapacityExceeded(_) => ErrorCategory::CapacityExceeded,
            OrchestratorError::ProvisionTimeout(_) => ErrorCategory::ProvisionTimeout,
            OrchestratorError::UnsupportedAction(_) => ErrorCategory::UnsupportedAction,
            OrchestratorError::Unknown(_) => ErrorCategory::Unknown,
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        OrchestratorError::InvalidArgument(err.to_string())
    }
}

impl From<ProtocolError> for OrchestratorError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedAction(action) => OrchestratorError::UnsupportedAction(action),
            ProtocolError::InvalidArgument(msg) => OrchestratorError::InvalidArgument(msg),
        }
    }
}

impl From<OrchestratorError> for ActionResponse {
    fn from(err: OrchestratorError) -> Self {
        ActionResponse::failure(err.category(), err.to_string())
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
