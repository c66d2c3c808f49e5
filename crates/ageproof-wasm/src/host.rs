//! Browser implementation of the handshake host environment.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use ageproof::handshake::{
    ChildContext, ContextId, HostEnvironment, InboundMessage, MessageSubscription, PageLocation,
    ScreenGeometry, ISSUER_ORIGIN,
};
use ageproof::HandshakeError;
use async_trait::async_trait;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{MessageEvent, Window};

use crate::error::describe;

/// Child windows opened by this host, keyed by the id handed to the core.
type ChildRegistry = Rc<RefCell<Vec<(ContextId, Window)>>>;

pub struct WebHost {
    window: Window,
    children: ChildRegistry,
    next_id: Cell<u64>,
}

impl WebHost {
    pub fn new() -> Result<Self, HandshakeError> {
        let window = web_sys::window()
            .ok_or_else(|| HandshakeError::Host("no global window".into()))?;
        Ok(Self {
            window,
            children: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(1),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

pub struct WebChild {
    id: ContextId,
    window: Window,
}

impl ChildContext for WebChild {
    fn id(&self) -> ContextId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.window.closed().unwrap_or(true)
    }

    fn close(&self) {
        let _ = self.window.close();
    }
}

#[async_trait(?Send)]
impl HostEnvironment for WebHost {
    type Child = WebChild;

    fn page_location(&self) -> PageLocation {
        let location = self.window.location();
        PageLocation {
            href: location.href().unwrap_or_default(),
            origin: location.origin().unwrap_or_default(),
        }
    }

    fn has_no_referrer_policy(&self) -> bool {
        let Some(document) = self.window.document() else {
            return false;
        };
        match document.query_selector("meta[name='referrer' i]") {
            Ok(Some(meta)) => meta
                .get_attribute("content")
                .is_some_and(|content| content.trim().eq_ignore_ascii_case("no-referrer")),
            _ => false,
        }
    }

    fn screen_geometry(&self) -> ScreenGeometry {
        let read = |name: &str| {
            js_sys::Reflect::get(&self.window, &JsValue::from_str(name))
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0) as i32
        };
        ScreenGeometry {
            left: read("screenX"),
            top: read("screenY"),
            width: read("outerWidth"),
            height: read("outerHeight"),
        }
    }

    fn open_child(&self, url: &str, features: &str) -> Option<WebChild> {
        let child = self
            .window
            .open_with_url_and_target_and_features(url, "_blank", features)
            .ok()
            .flatten()?;
        let id = ContextId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.children.borrow_mut().push((id, child.clone()));
        Some(WebChild { id, window: child })
    }

    fn navigate(&self, url: &str) -> Result<(), HandshakeError> {
        self.window
            .location()
            .set_href(url)
            .map_err(|e| HandshakeError::Host(format!("navigation failed: {}", describe(&e))))
    }

    fn listen(&self) -> Result<MessageSubscription, HandshakeError> {
        let children = self.children.clone();
        let window = self.window.clone();
        let closure_slot: Rc<RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>> =
            Rc::new(RefCell::new(None));
        let detach_slot = closure_slot.clone();
        let detach_window = window.clone();
        let (sender, subscription) = MessageSubscription::channel(move || {
            if let Some(closure) = detach_slot.borrow_mut().take() {
                let _ = detach_window
                    .remove_event_listener_with_callback("message", closure.as_ref().unchecked_ref());
            }
        });

        let closure = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            if let Some(message) = inbound_message(&event, &children.borrow()) {
                let _ = sender.send(message);
            }
        });
        window
            .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
            .map_err(|e| HandshakeError::Host(format!("cannot listen for messages: {}", describe(&e))))?;
        *closure_slot.borrow_mut() = Some(closure);
        Ok(subscription)
    }

    async fn sleep(&self, duration: Duration) {
        let ms = duration.as_millis().min(i32::MAX as u128) as i32;
        Timer::start(&self.window, ms).await;
    }

    fn warn(&self, message: &str) {
        web_sys::console::warn_1(&JsValue::from_str(&format!("[ageproof] {message}")));
    }
}

/// Convert a `message` event for the core. Events from any origin other
/// than the issuer are dropped here, before their data is touched.
pub fn inbound_message(event: &MessageEvent, children: &[(ContextId, Window)]) -> Option<InboundMessage> {
    let origin = event.origin();
    if origin != ISSUER_ORIGIN {
        return None;
    }
    let source = event.source().and_then(|source| {
        children
            .iter()
            .find(|(_, child)| js_sys::Object::is(&source, child))
            .map(|(id, _)| *id)
    });
    let data = serde_wasm_bindgen::from_value(event.data()).unwrap_or(serde_json::Value::Null);
    Some(InboundMessage {
        origin,
        source,
        data,
    })
}

// ============================================================================
// Timer
// ============================================================================

/// One `setTimeout`, cleared on drop if it has not fired yet.
///
/// If the timer cannot be registered the future never resolves.
pub struct Timer {
    window: Window,
    handle: Option<i32>,
    fired: JsFuture,
}

impl Timer {
    pub fn start(window: &Window, ms: i32) -> Self {
        let mut handle = None;
        let promise = js_sys::Promise::new(&mut |resolve, _| {
            handle = window
                .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms)
                .ok();
        });
        Self {
            window: window.clone(),
            handle,
            fired: JsFuture::from(promise),
        }
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.handle.is_none() {
            return Poll::Pending;
        }
        match Pin::new(&mut this.fired).poll(cx) {
            Poll::Ready(_) => {
                this.handle = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.window.clear_timeout_with_handle(handle);
        }
    }
}
