//! Caller-facing launch options.
//!
//! Mirrors the JS options object: every field is optional, and missing fields
//! or fields of the wrong type take the defaults below. A bad value never
//! fails the launch.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::DecodeLimits;
use crate::error::HandshakeError;

/// Default interval between child-context liveness checks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Data half of a handshake configuration (callbacks live in
/// [`HandshakeConfig`](crate::handshake::HandshakeConfig)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchOptions {
    /// Raw claim filter; sanitized before use.
    pub include: Option<Value>,
    /// Explicit correlation id. Non-string values are treated as absent.
    #[serde(deserialize_with = "string_or_none")]
    pub session: Option<String>,
    #[serde(deserialize_with = "string_or_none")]
    pub backend_verify_url: Option<String>,
    #[serde(deserialize_with = "flag_or_false")]
    pub backend_verify_allow_cross_origin: bool,
    /// Non-string entries are dropped.
    #[serde(deserialize_with = "strings_only")]
    pub backend_verify_allowed_origins: Vec<String>,
    /// Number and boolean values are stringified as `fetch` would; other
    /// values are dropped.
    #[serde(deserialize_with = "header_map")]
    pub backend_extra_headers: BTreeMap<String, String>,
    /// No timeout when unset, zero, negative, or not a number. Fractional
    /// milliseconds are truncated.
    #[serde(deserialize_with = "millis_or_none")]
    pub timeout_ms: Option<u64>,
    /// Fail instead of warning when the page lacks a no-referrer policy.
    #[serde(deserialize_with = "flag_or_false")]
    pub require_no_referrer: bool,
    #[serde(deserialize_with = "flag_or_true")]
    pub allow_full_page_fallback: bool,
    #[serde(deserialize_with = "millis_or_zero")]
    pub poll_interval_ms: u64,
    #[serde(deserialize_with = "lenient_limits")]
    pub limits: DecodeLimits,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            include: None,
            session: None,
            backend_verify_url: None,
            backend_verify_allow_cross_origin: false,
            backend_verify_allowed_origins: Vec::new(),
            backend_extra_headers: BTreeMap::new(),
            timeout_ms: None,
            require_no_referrer: false,
            allow_full_page_fallback: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            limits: DecodeLimits::default(),
        }
    }
}

impl LaunchOptions {
    /// Read options from an untrusted JSON value. `null` means all
    /// defaults; anything but an object is rejected.
    pub fn from_json(value: Value) -> Result<Self, HandshakeError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| HandshakeError::InvalidOptions(e.to_string())),
            other => Err(HandshakeError::InvalidOptions(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = if self.poll_interval_ms == 0 {
            DEFAULT_POLL_INTERVAL_MS
        } else {
            self.poll_interval_ms
        };
        Duration::from_millis(ms)
    }
}

// ============================================================================
// Lenient field readers
// ============================================================================

/// Non-negative integer milliseconds from a JSON number, truncating
/// fractions. Anything else is `None`.
fn as_millis(value: &Value) -> Option<u64> {
    if let Some(ms) = value.as_u64() {
        return Some(ms);
    }
    match value.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 && ms < u64::MAX as f64 => Some(ms as u64),
        _ => None,
    }
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}

fn millis_or_none<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(as_millis))
}

fn millis_or_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(millis_or_none(deserializer)?.unwrap_or(0))
}

fn flag<'de, D>(deserializer: D, default: bool) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_bool()).unwrap_or(default))
}

fn flag_or_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    flag(deserializer, false)
}

fn flag_or_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    flag(deserializer, true)
}

fn strings_only<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect())
}

fn header_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Object(entries)) = value else {
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            Value::Number(n) => Some((name, n.to_string())),
            Value::Bool(b) => Some((name, b.to_string())),
            _ => None,
        })
        .collect())
}

fn lenient_limits<'de, D>(deserializer: D) -> Result<DecodeLimits, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut limits = DecodeLimits::default();
    let Some(Value::Object(fields)) = value else {
        return Ok(limits);
    };
    let read = |name: &str, default: usize| {
        fields
            .get(name)
            .and_then(as_millis)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(default)
    };
    limits.max_token_chars = read("maxTokenChars", limits.max_token_chars);
    limits.max_decoded_bytes = read("maxDecodedBytes", limits.max_decoded_bytes);
    limits.max_inflated_chars = read("maxInflatedChars", limits.max_inflated_chars);
    Ok(limits)
}
