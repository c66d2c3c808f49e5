//! `fetch`-backed transport for backend verification.

use ageproof::backend::{BackendError, BackendRequest, BackendResponse, CancellationSignal, HttpTransport};
use async_trait::async_trait;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, Headers, RequestCache, RequestCredentials, RequestInit, RequestMode, Response, Window};

use crate::error::describe;

pub struct FetchTransport {
    window: Window,
}

impl FetchTransport {
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

fn transport_error(e: JsValue) -> BackendError {
    BackendError::Transport(describe(&e))
}

#[async_trait(?Send)]
impl HttpTransport for FetchTransport {
    async fn send(
        &self,
        request: BackendRequest,
        signal: &CancellationSignal,
    ) -> Result<BackendResponse, BackendError> {
        if signal.is_cancelled() {
            return Err(BackendError::Aborted);
        }

        let headers = Headers::new().map_err(transport_error)?;
        for (name, value) in &request.headers {
            headers
                .set(name, value)
                .map_err(|_| BackendError::InvalidHeader { name: name.clone() })?;
        }

        let controller = AbortController::new().map_err(transport_error)?;
        let init = RequestInit::new();
        init.set_method("POST");
        init.set_mode(RequestMode::Cors);
        init.set_credentials(RequestCredentials::Omit);
        init.set_cache(RequestCache::NoStore);
        init.set_headers(&headers);
        init.set_body(&JsValue::from_str(&request.body));
        init.set_signal(Some(&controller.signal()));

        // The controller may drop this future on timeout; the abort has to
        // outlive it.
        let abort_on = signal.clone();
        wasm_bindgen_futures::spawn_local(async move {
            abort_on.cancelled().await;
            controller.abort();
        });

        let response = JsFuture::from(self.window.fetch_with_str_and_init(&request.url, &init))
            .await
            .map_err(|e| {
                if signal.is_cancelled() {
                    BackendError::Aborted
                } else {
                    transport_error(e)
                }
            })?;
        let response: Response = response.dyn_into().map_err(transport_error)?;

        let content_type = response.headers().get("content-type").ok().flatten();
        let text = JsFuture::from(response.text().map_err(transport_error)?)
            .await
            .map_err(transport_error)?;

        Ok(BackendResponse {
            status: response.status(),
            content_type,
            body: text.as_string().unwrap_or_default(),
        })
    }
}
