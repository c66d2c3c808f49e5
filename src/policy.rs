//! Pure validation and normalization for handshake inputs.
//!
//! Nothing here performs I/O: sessions are checked or minted locally,
//! include lists are sanitized, and backend URLs are resolved and checked
//! against the page origin before any request is allowed to exist.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Longest session identifier accepted from the caller.
pub const MAX_SESSION_LENGTH: usize = 64;

/// Longest single claim name in an include list.
pub const MAX_INCLUDE_ENTRY_LENGTH: usize = 32;

/// Maximum number of claim names kept in an include list.
pub const MAX_INCLUDE_ENTRIES: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid page URL {href:?}: {reason}")]
    InvalidPageUrl { href: String, reason: String },

    #[error("Invalid backend verification URL {input:?}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error(
        "Backend verification URL origin {origin} is cross-origin; backend verification is \
         same-origin by default (set backendVerifyAllowCrossOrigin and \
         backendVerifyAllowedOrigins to opt in)"
    )]
    CrossOriginDisabled { origin: String },

    #[error("Backend verification origin {origin} is not in the backendVerifyAllowedOrigins allowlist")]
    OriginNotAllowed { origin: String },

    #[error("Cross-origin backend verification requires https, got {scheme}:")]
    InsecureCrossOrigin { scheme: String },

    #[error("Backend verification URL scheme {got}: does not match page scheme {expected}:")]
    SchemeMismatch { expected: String, got: String },
}

// ============================================================================
// Session
// ============================================================================

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("uuid regex")
    })
}

/// Whether `input` is an RFC 4122 UUID in hyphenated text form.
pub fn is_valid_session(input: &str) -> bool {
    input.len() <= MAX_SESSION_LENGTH && uuid_pattern().is_match(input)
}

/// Return the caller's session if it is a valid UUID, otherwise a fresh v4 UUID.
///
/// Never fails: the result is always usable as a correlation id.
pub fn normalize_session(input: Option<&str>) -> String {
    match input {
        Some(session) if is_valid_session(session) => session.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

// ============================================================================
// Include list
// ============================================================================

/// Ordered, deduplicated claim names requested from the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncludeList(Vec<String>);

impl IncludeList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined form used in the child-context query string.
    pub fn to_query_value(&self) -> String {
        self.0.join(",")
    }
}

/// Sanitize an untrusted include list.
///
/// Only arrays are accepted. String entries are trimmed; blanks, entries over
/// [`MAX_INCLUDE_ENTRY_LENGTH`] characters, duplicates, and non-strings are
/// dropped, and collection stops after [`MAX_INCLUDE_ENTRIES`] entries.
/// Returns `None` when nothing survives, meaning "no include filter".
pub fn sanitize_include_list(input: &Value) -> Option<IncludeList> {
    let entries = input.as_array()?;
    let mut kept: Vec<String> = Vec::new();

    for entry in entries {
        if kept.len() >= MAX_INCLUDE_ENTRIES {
            break;
        }
        let Some(text) = entry.as_str() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_INCLUDE_ENTRY_LENGTH {
            continue;
        }
        if kept.iter().any(|k| k == trimmed) {
            continue;
        }
        kept.push(trimmed.to_string());
    }

    if kept.is_empty() {
        None
    } else {
        Some(IncludeList(kept))
    }
}

// ============================================================================
// Backend URL
// ============================================================================

/// Page context and caller opt-ins used to vet a backend verification URL.
#[derive(Debug, Clone, Default)]
pub struct BackendUrlPolicy {
    /// Full URL of the current page; relative backend URLs resolve against it.
    pub page_href: String,
    /// Serialized origin of the current page.
    pub page_origin: String,
    pub allow_cross_origin: bool,
    pub allowed_origins: Vec<String>,
}

/// Resolve `raw` against the page and check it against the origin policy.
///
/// Same-origin URLs are allowed by default. Cross-origin URLs require the
/// caller's opt-in, an allowlist entry with the same origin, and https.
pub fn resolve_backend_url(raw: &str, policy: &BackendUrlPolicy) -> Result<String, PolicyError> {
    let page = Url::parse(&policy.page_href).map_err(|e| PolicyError::InvalidPageUrl {
        href: policy.page_href.clone(),
        reason: e.to_string(),
    })?;
    let resolved = page.join(raw).map_err(|e| PolicyError::InvalidUrl {
        input: raw.to_string(),
        reason: e.to_string(),
    })?;

    let resolved_origin = resolved.origin().ascii_serialization();
    let page_origin = serialize_origin(&policy.page_origin).unwrap_or_else(|| policy.page_origin.clone());

    if resolved_origin == page_origin {
        if resolved.scheme() != "https" && resolved.scheme() != page.scheme() {
            return Err(PolicyError::SchemeMismatch {
                expected: page.scheme().to_string(),
                got: resolved.scheme().to_string(),
            });
        }
        return Ok(resolved.to_string());
    }

    if !policy.allow_cross_origin {
        return Err(PolicyError::CrossOriginDisabled {
            origin: resolved_origin,
        });
    }

    let allowlisted = policy
        .allowed_origins
        .iter()
        .filter_map(|entry| serialize_origin(entry))
        .any(|origin| origin == resolved_origin);
    if !allowlisted {
        return Err(PolicyError::OriginNotAllowed {
            origin: resolved_origin,
        });
    }

    if resolved.scheme() != "https" {
        return Err(PolicyError::InsecureCrossOrigin {
            scheme: resolved.scheme().to_string(),
        });
    }

    Ok(resolved.to_string())
}

/// ASCII-serialized origin of an absolute URL, or `None` if it doesn't parse
/// or has an opaque origin.
fn serialize_origin(input: &str) -> Option<String> {
    let url = Url::parse(input.trim()).ok()?;
    let origin = url.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_policy() -> BackendUrlPolicy {
        BackendUrlPolicy {
            page_href: "https://rp.example/checkout?step=2".into(),
            page_origin: "https://rp.example".into(),
            ..Default::default()
        }
    }

    // --- session ---

    #[test]
    fn keeps_valid_session() {
        let session = "3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23";
        assert_eq!(normalize_session(Some(session)), session);
    }

    #[test]
    fn keeps_uppercase_session() {
        let session = "3F2B8C1E-9D4A-4B7E-8C21-5A6F0E9D1B23";
        assert_eq!(normalize_session(Some(session)), session);
    }

    #[test]
    fn replaces_missing_session() {
        let session = normalize_session(None);
        assert!(is_valid_session(&session));
        assert_eq!(session.as_bytes()[14], b'4');
    }

    #[test]
    fn replaces_malformed_sessions() {
        let oversized = "a".repeat(65);
        for input in [
            "",
            "not-a-uuid",
            "3f2b8c1e9d4a4b7e8c215a6f0e9d1b23",
            "{3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23}",
            "3f2b8c1e-9d4a-0b7e-8c21-5a6f0e9d1b23",
            "3f2b8c1e-9d4a-4b7e-cc21-5a6f0e9d1b23",
            " 3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23",
            oversized.as_str(),
        ] {
            let session = normalize_session(Some(input));
            assert_ne!(session, input);
            assert!(is_valid_session(&session), "{input:?} -> {session}");
        }
    }

    #[test]
    fn generated_sessions_are_unique() {
        assert_ne!(normalize_session(None), normalize_session(None));
    }

    // --- include list ---

    #[test]
    fn sanitizes_mixed_include_list() {
        let input = json!(["  loa  ", "loa", "", "x".repeat(100), "session", 123]);
        let list = sanitize_include_list(&input).unwrap();
        assert_eq!(list.as_slice(), ["loa", "session"]);
        assert_eq!(list.to_query_value(), "loa,session");
    }

    #[test]
    fn include_list_stops_after_eight_entries() {
        let input = json!(["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        let list = sanitize_include_list(&input).unwrap();
        assert_eq!(list.len(), MAX_INCLUDE_ENTRIES);
        assert_eq!(list.as_slice().last().unwrap(), "h");
    }

    #[test]
    fn duplicates_do_not_count_toward_limit() {
        let input = json!(["a", "a", "a", "a", "a", "a", "a", "a", "b"]);
        let list = sanitize_include_list(&input).unwrap();
        assert_eq!(list.as_slice(), ["a", "b"]);
    }

    #[test]
    fn entry_at_length_limit_is_kept() {
        let at_limit = "y".repeat(MAX_INCLUDE_ENTRY_LENGTH);
        let over = "z".repeat(MAX_INCLUDE_ENTRY_LENGTH + 1);
        let list = sanitize_include_list(&json!([at_limit.clone(), over])).unwrap();
        assert_eq!(list.as_slice(), [at_limit]);
    }

    #[test]
    fn empty_result_means_no_filter() {
        assert!(sanitize_include_list(&json!([])).is_none());
        assert!(sanitize_include_list(&json!(["", "   ", 7, null])).is_none());
    }

    #[test]
    fn non_array_input_is_ignored() {
        assert!(sanitize_include_list(&json!("loa")).is_none());
        assert!(sanitize_include_list(&json!({"0": "loa"})).is_none());
        assert!(sanitize_include_list(&Value::Null).is_none());
    }

    // --- backend URL ---

    #[test]
    fn resolves_relative_same_origin_url() {
        let url = resolve_backend_url("/api/verify", &page_policy()).unwrap();
        assert_eq!(url, "https://rp.example/api/verify");
    }

    #[test]
    fn resolves_absolute_same_origin_url() {
        let url = resolve_backend_url("https://rp.example/v?x=1", &page_policy()).unwrap();
        assert_eq!(url, "https://rp.example/v?x=1");
    }

    #[test]
    fn same_origin_http_page_allows_http_backend() {
        let policy = BackendUrlPolicy {
            page_href: "http://localhost:8080/".into(),
            page_origin: "http://localhost:8080".into(),
            ..Default::default()
        };
        let url = resolve_backend_url("/verify", &policy).unwrap();
        assert_eq!(url, "http://localhost:8080/verify");
    }

    #[test]
    fn rejects_cross_origin_without_opt_in() {
        let err = resolve_backend_url("https://api.example/verify", &page_policy()).unwrap_err();
        assert!(matches!(err, PolicyError::CrossOriginDisabled { .. }));
        assert!(err.to_string().contains("same-origin by default"));
    }

    #[test]
    fn rejects_cross_origin_missing_from_allowlist() {
        let policy = BackendUrlPolicy {
            allow_cross_origin: true,
            allowed_origins: vec!["https://other.example".into()],
            ..page_policy()
        };
        let err = resolve_backend_url("https://api.example/verify", &policy).unwrap_err();
        assert!(matches!(err, PolicyError::OriginNotAllowed { .. }));
        assert!(err.to_string().contains("allowlist"));
    }

    #[test]
    fn allows_allowlisted_https_origin() {
        let policy = BackendUrlPolicy {
            allow_cross_origin: true,
            allowed_origins: vec!["https://api.example/".into()],
            ..page_policy()
        };
        let url = resolve_backend_url("https://api.example/verify", &policy).unwrap();
        assert_eq!(url, "https://api.example/verify");
    }

    #[test]
    fn allowlist_compares_origins_not_prefixes() {
        let policy = BackendUrlPolicy {
            allow_cross_origin: true,
            allowed_origins: vec!["https://api.example".into()],
            ..page_policy()
        };
        let err = resolve_backend_url("https://api.example.evil.test/verify", &policy).unwrap_err();
        assert!(matches!(err, PolicyError::OriginNotAllowed { .. }));
    }

    #[test]
    fn rejects_allowlisted_http_origin() {
        let policy = BackendUrlPolicy {
            allow_cross_origin: true,
            allowed_origins: vec!["http://api.example".into()],
            ..page_policy()
        };
        let err = resolve_backend_url("http://api.example/verify", &policy).unwrap_err();
        assert!(matches!(err, PolicyError::InsecureCrossOrigin { .. }));
    }

    #[test]
    fn rejects_opaque_origin_urls() {
        let policy = BackendUrlPolicy {
            allow_cross_origin: true,
            allowed_origins: vec!["null".into()],
            ..page_policy()
        };
        let err = resolve_backend_url("data:text/plain,hi", &policy).unwrap_err();
        assert!(matches!(err, PolicyError::OriginNotAllowed { .. }));
    }

    #[test]
    fn rejects_unparseable_page_href() {
        let policy = BackendUrlPolicy {
            page_href: "not a url".into(),
            ..page_policy()
        };
        let err = resolve_backend_url("/api", &policy).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPageUrl { .. }));
    }
}
