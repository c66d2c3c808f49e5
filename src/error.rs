use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;
use crate::policy::PolicyError;

/// Terminal failure delivered to the `on_failure` callback.
///
/// Popup closure by the user is deliberately absent: it ends the handshake
/// quietly and never reaches a callback.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Handshake timed out after {timeout_ms}ms without a valid response")]
    Timeout { timeout_ms: u64 },

    #[error("Popup was blocked and full-page fallback is disabled")]
    PopupBlocked,

    #[error("Page has no \"no-referrer\" referrer policy and requireNoReferrer is set")]
    ReferrerPolicyMissing,

    #[error("Invalid launch options: {0}")]
    InvalidOptions(String),

    #[error("Host environment error: {0}")]
    Host(String),
}

/// Coarse classification of a [`HandshakeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or oversized token at some decode stage.
    Validation,
    /// Backend URL rejected before any request was made.
    Policy,
    /// Non-success backend response or transport failure.
    Network,
    /// No valid message within the configured duration.
    Timeout,
    /// The page or browser could not host the handshake.
    Environment,
}

impl ErrorKind {
    /// Name used for the JS `Error.name` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Policy => "PolicyError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Environment => "EnvironmentError",
        }
    }
}

impl HandshakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandshakeError::Codec(_) | HandshakeError::InvalidOptions(_) => ErrorKind::Validation,
            HandshakeError::Policy(_) => ErrorKind::Policy,
            HandshakeError::Backend(BackendError::Policy(_)) => ErrorKind::Policy,
            HandshakeError::Backend(_) => ErrorKind::Network,
            HandshakeError::Timeout { .. } => ErrorKind::Timeout,
            HandshakeError::PopupBlocked
            | HandshakeError::ReferrerPolicyMissing
            | HandshakeError::Host(_) => ErrorKind::Environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_policy_errors_classify_as_policy() {
        let err = HandshakeError::from(BackendError::Policy(PolicyError::CrossOriginDisabled {
            origin: "https://api.example".into(),
        }));
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[test]
    fn http_status_classifies_as_network() {
        let err = HandshakeError::from(BackendError::Status {
            status: 502,
            body: None,
        });
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.kind().as_str(), "NetworkError");
    }

    #[test]
    fn codec_errors_classify_as_validation() {
        let err = HandshakeError::from(CodecError::EmptyToken);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn timeout_message_includes_duration() {
        let err = HandshakeError::Timeout { timeout_ms: 1500 };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("1500ms"));
    }
}
