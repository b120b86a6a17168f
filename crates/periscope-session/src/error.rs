use thiserror::Error;

use crate::state::ConnectionState;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("signaling endpoint returned HTTP {status}: {body}")]
    Signaling { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("{0}")]
    Timeout(String),
    #[error("invalid session description: {0}")]
    Sdp(String),
    #[error("ice failure: connection {0}")]
    IceFailure(ConnectionState),
    #[error("peer setup failed: {0}")]
    Setup(String),
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("connection attempts cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn gathering_timeout() -> Self {
        SessionError::Timeout("ICE gathering timeout".into())
    }

    /// Whether the retry loop may schedule another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SessionError::InvalidConfig(_) | SessionError::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionError::Signaling { .. } => "signaling",
            SessionError::Network(_) => "network",
            SessionError::Timeout(_) => "timeout",
            SessionError::Sdp(_) => "sdp",
            SessionError::IceFailure(_) => "ice_failure",
            SessionError::Setup(_) => "setup",
            SessionError::InvalidConfig(_) => "invalid_config",
            SessionError::Cancelled => "cancelled",
        }
    }
}

pub(crate) fn to_setup_error<E: std::fmt::Display>(err: E) -> SessionError {
    SessionError::Setup(err.to_string())
}

pub(crate) fn to_sdp_error<E: std::fmt::Display>(err: E) -> SessionError {
    SessionError::Sdp(err.to_string())
}
