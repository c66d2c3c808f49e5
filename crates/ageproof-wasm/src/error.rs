//! Error conversion for the WASM boundary.

use ageproof::HandshakeError;
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};

/// A JS `Error` whose `name` is the failure kind (`ValidationError`,
/// `NetworkError`, ...) and whose `message` is the Rust `Display` text.
pub fn to_js_error(e: impl Into<HandshakeError>) -> JsValue {
    let e = e.into();
    named_error(e.kind().as_str(), &e.to_string())
}

pub fn named_error(name: &str, message: &str) -> JsValue {
    let error = js_sys::Error::new(message);
    error.set_name(name);
    error.into()
}

/// Options that could not be read into their Rust shape.
pub fn type_error(e: impl std::fmt::Display) -> JsValue {
    named_error("TypeError", &e.to_string())
}

/// Serialize a Rust value to a JS value, using plain objects instead of Maps
/// and `null` instead of `undefined` for JSON nulls.
pub fn to_js_value(value: &impl Serialize) -> Result<JsValue, JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::new()
        .serialize_maps_as_objects(true)
        .serialize_missing_as_null(true);
    value.serialize(&serializer).map_err(type_error)
}

/// Best-effort text for a thrown JS value.
pub fn describe(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}
