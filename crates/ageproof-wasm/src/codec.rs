//! WASM binding for token decoding.

use ageproof::{decode_token, DecodeLimits};
use wasm_bindgen::prelude::*;

use crate::error::{to_js_error, type_error};

/// Decode an issuer token into its credential string. `limits` is optional;
/// missing fields keep their defaults.
#[wasm_bindgen(js_name = "decodeToken")]
pub fn wasm_decode_token(token: &str, limits: JsValue) -> Result<String, JsValue> {
    let limits: DecodeLimits = if limits.is_undefined() || limits.is_null() {
        DecodeLimits::default()
    } else {
        serde_wasm_bindgen::from_value(limits).map_err(type_error)?
    };
    decode_token(token, &limits).map_err(to_js_error)
}
