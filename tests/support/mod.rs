//! Fake host environment and transport for driving the handshake in tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use ageproof::backend::{BackendError, BackendRequest, BackendResponse, CancellationSignal, HttpTransport};
use ageproof::handshake::{
    ChildContext, ContextId, HostEnvironment, InboundMessage, MessageSubscription, PageLocation,
    ScreenGeometry, ISSUER_ORIGIN,
};
use ageproof::{HandshakeConfig, HandshakeError, LaunchOptions, ResultPayload};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

pub const CHILD_ID: ContextId = ContextId(7);
pub const SESSION: &str = "3f2b8c1e-9d4a-4b7e-8c21-5a6f0e9d1b23";

// ============================================================================
// Token encoding (issuer side)
// ============================================================================

pub fn encode_token(credential: &str) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(hex::encode(credential).as_bytes())
        .expect("gzip write");
    URL_SAFE_NO_PAD.encode(encoder.finish().expect("gzip finish"))
}

pub fn issuer_message(data: Value) -> InboundMessage {
    InboundMessage {
        origin: ISSUER_ORIGIN.to_string(),
        source: Some(CHILD_ID),
        data,
    }
}

pub fn valid_message(credential: &str) -> InboundMessage {
    issuer_message(json!({
        "token": encode_token(credential),
        "session": SESSION,
        "authenticationResponse": {"method": "facial-age-estimation"}
    }))
}

// ============================================================================
// FakeHost
// ============================================================================

pub struct HostState {
    pub no_referrer: Cell<bool>,
    pub popup_allowed: Cell<bool>,
    pub opened: RefCell<Vec<(String, String)>>,
    pub navigated: RefCell<Vec<String>>,
    pub warnings: RefCell<Vec<String>>,
    pub child_closed: Rc<Cell<bool>>,
    pub close_calls: Rc<Cell<u32>>,
    pub detached: Rc<Cell<bool>>,
    subscription: RefCell<Option<MessageSubscription>>,
    sender: UnboundedSender<InboundMessage>,
}

#[derive(Clone)]
pub struct FakeHost(pub Rc<HostState>);

impl FakeHost {
    pub fn new() -> Self {
        let detached = Rc::new(Cell::new(false));
        let flag = detached.clone();
        let (sender, subscription) = MessageSubscription::channel(move || flag.set(true));
        FakeHost(Rc::new(HostState {
            no_referrer: Cell::new(true),
            popup_allowed: Cell::new(true),
            opened: RefCell::new(Vec::new()),
            navigated: RefCell::new(Vec::new()),
            warnings: RefCell::new(Vec::new()),
            child_closed: Rc::new(Cell::new(false)),
            close_calls: Rc::new(Cell::new(0)),
            detached,
            subscription: RefCell::new(Some(subscription)),
            sender,
        }))
    }

    /// Queue a message on the shared channel; delivered once listening.
    pub fn post(&self, message: InboundMessage) {
        let _ = self.0.sender.send(message);
    }

    /// Simulate the user closing the popup.
    pub fn close_child(&self) {
        self.0.child_closed.set(true);
    }

    pub fn opened_url(&self) -> Option<String> {
        self.0.opened.borrow().first().map(|(url, _)| url.clone())
    }
}

pub struct FakeChild {
    closed: Rc<Cell<bool>>,
    close_calls: Rc<Cell<u32>>,
}

impl ChildContext for FakeChild {
    fn id(&self) -> ContextId {
        CHILD_ID
    }

    fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn close(&self) {
        self.close_calls.set(self.close_calls.get() + 1);
        self.closed.set(true);
    }
}

#[async_trait(?Send)]
impl HostEnvironment for FakeHost {
    type Child = FakeChild;

    fn page_location(&self) -> PageLocation {
        PageLocation {
            href: "https://rp.example/checkout".into(),
            origin: "https://rp.example".into(),
        }
    }

    fn has_no_referrer_policy(&self) -> bool {
        self.0.no_referrer.get()
    }

    fn screen_geometry(&self) -> ScreenGeometry {
        ScreenGeometry {
            left: 0,
            top: 0,
            width: 1440,
            height: 900,
        }
    }

    fn open_child(&self, url: &str, features: &str) -> Option<FakeChild> {
        if !self.0.popup_allowed.get() {
            return None;
        }
        self.0
            .opened
            .borrow_mut()
            .push((url.to_string(), features.to_string()));
        Some(FakeChild {
            closed: self.0.child_closed.clone(),
            close_calls: self.0.close_calls.clone(),
        })
    }

    fn navigate(&self, url: &str) -> Result<(), HandshakeError> {
        self.0.navigated.borrow_mut().push(url.to_string());
        Ok(())
    }

    fn listen(&self) -> Result<MessageSubscription, HandshakeError> {
        self.0
            .subscription
            .borrow_mut()
            .take()
            .ok_or_else(|| HandshakeError::Host("already listening".into()))
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn warn(&self, message: &str) {
        self.0.warnings.borrow_mut().push(message.to_string());
    }
}

// ============================================================================
// FakeTransport
// ============================================================================

pub struct TransportState {
    pub requests: RefCell<Vec<BackendRequest>>,
    pub signals: RefCell<Vec<CancellationSignal>>,
    pub response: RefCell<BackendResponse>,
    /// Delay before answering; `None` never answers.
    pub delay: Cell<Option<Duration>>,
}

#[derive(Clone)]
pub struct FakeTransport(pub Rc<TransportState>);

impl FakeTransport {
    pub fn json(status: u16, body: Value) -> Self {
        FakeTransport(Rc::new(TransportState {
            requests: RefCell::new(Vec::new()),
            signals: RefCell::new(Vec::new()),
            response: RefCell::new(BackendResponse {
                status,
                content_type: Some("application/json".into()),
                body: body.to_string(),
            }),
            delay: Cell::new(Some(Duration::ZERO)),
        }))
    }

    pub fn hanging() -> Self {
        let transport = Self::json(200, Value::Null);
        transport.0.delay.set(None);
        transport
    }

    pub fn request_count(&self) -> usize {
        self.0.requests.borrow().len()
    }
}

#[async_trait(?Send)]
impl HttpTransport for FakeTransport {
    async fn send(
        &self,
        request: BackendRequest,
        signal: &CancellationSignal,
    ) -> Result<BackendResponse, BackendError> {
        self.0.requests.borrow_mut().push(request);
        self.0.signals.borrow_mut().push(signal.clone());
        match self.0.delay.get() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => std::future::pending::<()>().await,
        }
        Ok(self.0.response.borrow().clone())
    }
}

// ============================================================================
// Callback recording
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Success {
        credential: String,
        payload: ResultPayload,
        backend_result: Value,
    },
    Failure {
        kind: &'static str,
        message: String,
    },
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Config whose callbacks append to the returned log.
pub fn recording_config(options: LaunchOptions) -> (HandshakeConfig, EventLog) {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    let success_log = log.clone();
    let failure_log = log.clone();
    let config = HandshakeConfig::new(options)
        .on_success(move |credential, payload, backend_result| {
            success_log.borrow_mut().push(Event::Success {
                credential,
                payload,
                backend_result,
            });
        })
        .on_failure(move |error| {
            failure_log.borrow_mut().push(Event::Failure {
                kind: error.kind().as_str(),
                message: error.to_string(),
            });
        });
    (config, log)
}

pub fn options_with_session() -> LaunchOptions {
    LaunchOptions {
        session: Some(SESSION.to_string()),
        ..Default::default()
    }
}
