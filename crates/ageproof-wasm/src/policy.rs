//! WASM bindings for the session, include-list, and backend URL policies.

use ageproof::handshake::HostEnvironment;
use ageproof::{normalize_session, resolve_backend_url, sanitize_include_list, BackendUrlPolicy};
use serde::Deserialize;
use wasm_bindgen::prelude::*;

use crate::error::{to_js_error, to_js_value, type_error};
use crate::host::WebHost;

#[wasm_bindgen(js_name = "normalizeSession")]
pub fn wasm_normalize_session(session: Option<String>) -> String {
    normalize_session(session.as_deref())
}

/// Returns the cleaned list, or `null` when nothing usable remains.
#[wasm_bindgen(js_name = "sanitizeIncludeList")]
pub fn wasm_sanitize_include_list(include: JsValue) -> Result<JsValue, JsValue> {
    let value: serde_json::Value = serde_wasm_bindgen::from_value(include).map_err(type_error)?;
    match sanitize_include_list(&value) {
        Some(list) => to_js_value(&list),
        None => Ok(JsValue::NULL),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ResolveOptions {
    allow_cross_origin: bool,
    allowed_origins: Vec<String>,
}

/// Resolve `raw` against the current page and apply the origin policy.
#[wasm_bindgen(js_name = "resolveBackendUrl")]
pub fn wasm_resolve_backend_url(raw: &str, options: JsValue) -> Result<String, JsValue> {
    let options: ResolveOptions = if options.is_undefined() || options.is_null() {
        ResolveOptions::default()
    } else {
        serde_wasm_bindgen::from_value(options).map_err(type_error)?
    };
    let page = WebHost::new().map_err(to_js_error)?.page_location();
    let policy = BackendUrlPolicy {
        page_href: page.href,
        page_origin: page.origin,
        allow_cross_origin: options.allow_cross_origin,
        allowed_origins: options.allowed_origins,
    };
    resolve_backend_url(raw, &policy).map_err(to_js_error)
}
