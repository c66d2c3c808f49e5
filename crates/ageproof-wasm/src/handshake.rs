//! `launch` entry point.

use std::cell::Cell;
use std::rc::Rc;

use ageproof::{launch, HandshakeConfig, HandshakeError, LaunchOptions, Outcome, ResultPayload};
use js_sys::Function;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::error::{describe, to_js_error, to_js_value};
use crate::host::WebHost;
use crate::transport::FetchTransport;

/// Read `LaunchOptions` from a JS options object. Function-valued fields
/// (the callbacks) are skipped; wrongly typed fields take their defaults.
pub fn read_options(options: &JsValue) -> Result<LaunchOptions, HandshakeError> {
    if options.is_undefined() || options.is_null() {
        return Ok(LaunchOptions::default());
    }
    let json = js_sys::JSON::stringify(options)
        .map_err(|e| HandshakeError::InvalidOptions(describe(&e)))?
        .as_string()
        .ok_or_else(|| HandshakeError::InvalidOptions("options are not serializable".into()))?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| HandshakeError::InvalidOptions(e.to_string()))?;
    LaunchOptions::from_json(value)
}

fn read_callback(options: &JsValue, name: &str) -> Option<Function> {
    if options.is_undefined() || options.is_null() {
        return None;
    }
    js_sys::Reflect::get(options, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}

/// Stable name for a terminal outcome, as resolved by the `launch` promise.
pub fn outcome_name(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure(_) => "failure",
        Outcome::CancelledByUser => "cancelled",
        Outcome::Redirected => "redirected",
    }
}

/// Convert a result value for a JS callback. Integers beyond 2^53 cannot go
/// through serde-wasm-bindgen, so fall back to `JSON.parse`, which rounds
/// them the way `response.json()` would.
pub fn result_to_js(value: &impl Serialize) -> Result<JsValue, HandshakeError> {
    if let Ok(js) = to_js_value(value) {
        return Ok(js);
    }
    let json = serde_json::to_string(value)
        .map_err(|e| HandshakeError::Host(format!("cannot convert result: {e}")))?;
    js_sys::JSON::parse(&json)
        .map_err(|e| HandshakeError::Host(format!("cannot convert result: {}", describe(&e))))
}

// ============================================================================
// Callback bridge
// ============================================================================

/// What happened when the bridge handed a result to JS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Success,
    Failure,
    /// The callback threw; the exception was logged.
    Threw,
    /// No callback of the needed kind was supplied; logged instead.
    Missing,
}

/// The caller's `onSuccess`/`onFailure` functions. A success result that
/// cannot be handed to JS is delivered to `onFailure` instead, so exactly
/// one callback still runs.
pub struct CallbackBridge {
    on_success: Option<Function>,
    on_failure: Option<Function>,
    rerouted: Cell<bool>,
}

impl CallbackBridge {
    pub fn new(on_success: Option<Function>, on_failure: Option<Function>) -> Self {
        Self {
            on_success,
            on_failure,
            rerouted: Cell::new(false),
        }
    }

    pub fn from_options(options: &JsValue) -> Self {
        Self::new(
            read_callback(options, "onSuccess"),
            read_callback(options, "onFailure"),
        )
    }

    pub fn success(&self, credential: &str, payload: &ResultPayload, backend_result: &Value) -> Delivery {
        let Some(callback) = &self.on_success else {
            return Delivery::Missing;
        };
        let args = result_to_js(payload).and_then(|payload| Ok((payload, result_to_js(backend_result)?)));
        let (payload, backend_result) = match args {
            Ok(args) => args,
            Err(e) => {
                self.rerouted.set(true);
                return self.failure(e);
            }
        };
        match callback.call3(
            &JsValue::UNDEFINED,
            &JsValue::from_str(credential),
            &payload,
            &backend_result,
        ) {
            Ok(_) => Delivery::Success,
            Err(thrown) => report_throw("onSuccess", &thrown),
        }
    }

    /// Whether a success was turned into a failure because its result could
    /// not be converted.
    pub fn rerouted(&self) -> bool {
        self.rerouted.get()
    }

    pub fn failure(&self, error: HandshakeError) -> Delivery {
        let Some(callback) = &self.on_failure else {
            web_sys::console::warn_1(&JsValue::from_str(&format!(
                "[ageproof] handshake failed with no onFailure callback: {error}"
            )));
            return Delivery::Missing;
        };
        match callback.call1(&JsValue::UNDEFINED, &to_js_error(error)) {
            Ok(_) => Delivery::Failure,
            Err(thrown) => report_throw("onFailure", &thrown),
        }
    }
}

fn report_throw(name: &str, thrown: &JsValue) -> Delivery {
    web_sys::console::error_2(
        &JsValue::from_str(&format!("[ageproof] {name} callback threw")),
        thrown,
    );
    Delivery::Threw
}

/// Open the issuer, wait for its response, and fire `onSuccess` or
/// `onFailure` at most once.
///
/// Resolves with `"success"`, `"failure"`, `"cancelled"` (the user closed the
/// popup), or `"redirected"` (the page navigated to the issuer instead).
#[wasm_bindgen(js_name = "launch")]
pub async fn wasm_launch(options: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let bridge = Rc::new(CallbackBridge::from_options(&options));
    let host = read_options(&options).and_then(|launch_options| Ok((launch_options, WebHost::new()?)));
    let (launch_options, host) = match host {
        Ok(ready) => ready,
        Err(e) => {
            let outcome = Outcome::Failure(e.kind());
            bridge.failure(e);
            return Ok(JsValue::from_str(outcome_name(outcome)));
        }
    };
    let transport = FetchTransport::new(host.window().clone());

    let on_success = bridge.clone();
    let on_failure = bridge.clone();
    let config = HandshakeConfig::new(launch_options)
        .on_success(move |credential, payload, backend_result| {
            on_success.success(&credential, &payload, &backend_result);
        })
        .on_failure(move |error| {
            on_failure.failure(error);
        });

    let outcome = launch(host, transport, config).await;
    if outcome == Outcome::Success && bridge.rerouted() {
        return Ok(JsValue::from_str("failure"));
    }
    Ok(JsValue::from_str(outcome_name(outcome)))
}
