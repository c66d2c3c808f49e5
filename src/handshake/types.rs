use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::config::LaunchOptions;
use crate::error::{ErrorKind, HandshakeError};
use crate::policy::IncludeList;

/// Receives `(credential, payload, backend_result)`; `backend_result` is
/// `Value::Null` when no backend URL was configured.
pub type SuccessCallback = Box<dyn FnOnce(String, ResultPayload, Value)>;

pub type FailureCallback = Box<dyn FnOnce(HandshakeError)>;

/// Everything a single `launch` needs: options plus terminal callbacks.
#[derive(Default)]
pub struct HandshakeConfig {
    pub options: LaunchOptions,
    pub(crate) on_success: Option<SuccessCallback>,
    pub(crate) on_failure: Option<FailureCallback>,
}

impl HandshakeConfig {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_success(mut self, callback: impl FnOnce(String, ResultPayload, Value) + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_failure(mut self, callback: impl FnOnce(HandshakeError) + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("options", &self.options)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

/// Context handed to the success callback and forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<IncludeList>,
    pub session: String,
    pub authentication_response: Value,
}

/// Terminal state of one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
    /// Child context closed before a valid message; no callback fired.
    CancelledByUser,
    /// Popup could not open and the page navigated to the issuer instead.
    Redirected,
}

// ============================================================================
// Wire message
// ============================================================================

/// Why an inbound message from the issuer was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    MissingToken,
    SessionMismatch,
    MissingAuthenticationResponse,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::NotAnObject => "payload is not an object",
            Rejection::MissingToken => "token is missing or not a string",
            Rejection::SessionMismatch => "session does not match",
            Rejection::MissingAuthenticationResponse => "authenticationResponse is not an object",
        };
        f.write_str(reason)
    }
}

/// A structurally valid message bound to the active session.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub token: String,
    pub authentication_response: Value,
}

impl WireMessage {
    /// Accept `data` only if it is `{ token: string, session: <expected>,
    /// authenticationResponse: object }`.
    pub fn parse(data: Value, expected_session: &str) -> Result<Self, Rejection> {
        let Value::Object(mut obj) = data else {
            return Err(Rejection::NotAnObject);
        };

        let token = match obj.remove("token") {
            Some(Value::String(token)) => token,
            _ => return Err(Rejection::MissingToken),
        };
        match obj.get("session") {
            Some(Value::String(session)) if session == expected_session => {}
            _ => return Err(Rejection::SessionMismatch),
        }
        let authentication_response = match obj.remove("authenticationResponse") {
            Some(value @ Value::Object(_)) => value,
            _ => return Err(Rejection::MissingAuthenticationResponse),
        };

        Ok(Self {
            token,
            authentication_response,
        })
    }
}
