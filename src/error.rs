use thiserror::Error;

/// Errors surfaced by the call-session layer.
///
/// Precondition and permission errors are returned to the caller of the
/// operation that triggered them. Transport and refresh errors are also
/// recorded in the session's observable error slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("already on a call")]
    AlreadyOnCall,

    #[error("no incoming call")]
    NoIncomingCall,

    #[error("not connected to the signaling platform")]
    ConnectionRequired,

    #[error("not a dialable destination: {0}")]
    InvalidDestination(String),

    /// The operator hung up before the outbound call was placed.
    #[error("dial cancelled")]
    DialCancelled,

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("credential refresh failed: {0}")]
    RefreshFailure(String),
}

impl CallError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        CallError::TransportFailure(err.to_string())
    }

    pub fn refresh(err: impl std::fmt::Display) -> Self {
        CallError::RefreshFailure(err.to_string())
    }
}

pub type CallResult<T> = std::result::Result<T, CallError>;
