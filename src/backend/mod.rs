//! Optional server-side confirmation of a credential by the relying party.
//!
//! The verifier never talks to the network directly: requests go through an
//! [`HttpTransport`], which is `fetch` in the browser and `reqwest` natively.

#[cfg(feature = "reqwest")]
mod http;

#[cfg(feature = "reqwest")]
pub use http::ReqwestTransport;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::handshake::ResultPayload;
use crate::policy::{resolve_backend_url, BackendUrlPolicy, PolicyError};

/// Longest response body quoted in a [`BackendError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("Invalid backend header {name:?}")]
    InvalidHeader { name: String },

    #[error("Backend verification failed with status {status}{}", fmt_body(.body))]
    Status { status: u16, body: Option<String> },

    #[error("Backend verification request failed: {0}")]
    Transport(String),

    #[error("Backend verification request was cancelled")]
    Aborted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_body(body: &Option<String>) -> String {
    match body {
        Some(text) => format!(": {text}"),
        None => String::new(),
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared, one-way cancellation flag.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HttpTransport: host-provided network layer
// ============================================================================

/// Outbound backend verification request.
///
/// Always a POST with a JSON body. Transports must not attach cookies or
/// other ambient credentials and must bypass HTTP caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Raw backend response as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Host-implemented HTTP client.
#[async_trait(?Send)]
pub trait HttpTransport {
    /// Send `request`. Implementations should stop work once `signal` is
    /// cancelled; the verifier also drops the future at that point.
    async fn send(
        &self,
        request: BackendRequest,
        signal: &CancellationSignal,
    ) -> Result<BackendResponse, BackendError>;
}

// ============================================================================
// BackendVerifier
// ============================================================================

#[derive(Serialize)]
struct VerifyBody<'a> {
    jwt: &'a str,
    #[serde(flatten)]
    payload: &'a ResultPayload,
}

/// Forwards a decoded credential to the relying party's backend.
pub struct BackendVerifier<T> {
    transport: T,
}

impl<T: HttpTransport> BackendVerifier<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// POST `{ jwt, include, session, authenticationResponse }` to `url`.
    ///
    /// The URL is vetted by [`resolve_backend_url`] first; a policy failure
    /// returns before any request exists. Non-2xx responses are errors. A
    /// 2xx body is parsed only when its content type says JSON, and an
    /// unparseable body yields `Value::Null`.
    pub async fn verify(
        &self,
        url: &str,
        policy: &BackendUrlPolicy,
        credential: &str,
        payload: &ResultPayload,
        extra_headers: &BTreeMap<String, String>,
        signal: &CancellationSignal,
    ) -> Result<Value, BackendError> {
        let resolved = resolve_backend_url(url, policy)?;
        let headers = merge_headers(extra_headers)?;
        let body = serde_json::to_string(&VerifyBody {
            jwt: credential,
            payload,
        })?;

        if signal.is_cancelled() {
            return Err(BackendError::Aborted);
        }

        tracing::debug!(url = %resolved, "sending backend verification request");
        let request = BackendRequest {
            url: resolved,
            headers,
            body,
        };
        let response = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(BackendError::Aborted),
            response = self.transport.send(request, signal) => response?,
        };

        if !(200..300).contains(&response.status) {
            let body = Some(response.body)
                .filter(|text| !text.is_empty())
                .map(|text| text.chars().take(MAX_ERROR_BODY_CHARS).collect());
            return Err(BackendError::Status {
                status: response.status,
                body,
            });
        }

        Ok(parse_result(response.content_type.as_deref(), &response.body))
    }
}

fn parse_result(content_type: Option<&str>, body: &str) -> Value {
    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    if !is_json {
        return Value::Null;
    }
    match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("ignoring unparseable backend JSON: {e}");
            Value::Null
        }
    }
}

/// Default JSON headers with the caller's extras merged over them
/// (case-insensitive on names).
fn merge_headers(extra: &BTreeMap<String, String>) -> Result<Vec<(String, String)>, BackendError> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "application/json".to_string()),
    ];
    for (name, value) in extra {
        if !is_valid_header_name(name) || !is_valid_header_value(value) {
            return Err(BackendError::InvalidHeader { name: name.clone() });
        }
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
    Ok(headers)
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn is_valid_header_value(value: &str) -> bool {
    !value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0)
}
