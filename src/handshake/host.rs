//! Host environment seam.
//!
//! The controller never touches a browser API directly. Page queries, the
//! child browsing context, the `message` channel, and timers all come from a
//! [`HostEnvironment`], so tests can inject a fake one.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::HandshakeError;

/// Boxed timer future returned by [`HostEnvironment::sleep`].
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub href: String,
    pub origin: String,
}

/// Position and size of the opener window, used to center the popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenGeometry {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

/// Host-assigned identity of a browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// One event from the shared `message` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub origin: String,
    /// Identity of the posting context, `None` if the host doesn't know it.
    pub source: Option<ContextId>,
    pub data: Value,
}

/// Handle to an opened child browsing context.
pub trait ChildContext {
    fn id(&self) -> ContextId;
    fn is_closed(&self) -> bool;
    fn close(&self);
}

#[async_trait(?Send)]
pub trait HostEnvironment {
    type Child: ChildContext;

    fn page_location(&self) -> PageLocation;

    /// Whether the page declares a `no-referrer` referrer policy.
    fn has_no_referrer_policy(&self) -> bool;

    fn screen_geometry(&self) -> ScreenGeometry;

    /// Open a child context; `None` if the browser blocked it.
    fn open_child(&self, url: &str, features: &str) -> Option<Self::Child>;

    /// Navigate the current page (full-page fallback).
    fn navigate(&self, url: &str) -> Result<(), HandshakeError>;

    /// Start delivering `message` events. Dropping the subscription must
    /// detach the underlying listener.
    fn listen(&self) -> Result<MessageSubscription, HandshakeError>;

    async fn sleep(&self, duration: Duration);

    /// Surface a warning meant for the integrator. Hosts with their own
    /// console should override this.
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

// ============================================================================
// MessageSubscription
// ============================================================================

/// Receiving end of the `message` channel plus the hook that detaches the
/// host listener. Detaches at most once, on [`detach`](Self::detach) or drop.
pub struct MessageSubscription {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    on_detach: Option<Box<dyn FnOnce()>>,
}

impl MessageSubscription {
    /// Create a subscription and the sender the host listener feeds.
    pub fn channel(
        on_detach: impl FnOnce() + 'static,
    ) -> (mpsc::UnboundedSender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Self {
            rx,
            on_detach: Some(Box::new(on_detach)),
        };
        (tx, subscription)
    }

    /// Next message, or `None` once the host side has gone away.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        if self.on_detach.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn detach(&mut self) {
        if let Some(on_detach) = self.on_detach.take() {
            self.rx.close();
            on_detach();
        }
    }

    pub fn is_detached(&self) -> bool {
        self.on_detach.is_none()
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.detach();
    }
}
