//! HandshakeController: one popup, one accepted message, one callback.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use super::child::{build_child_url, popup_features, ISSUER_ORIGIN};
use super::host::{ChildContext, HostEnvironment, InboundMessage, MessageSubscription, Sleep};
use super::state::HandshakeState;
use super::types::{FailureCallback, HandshakeConfig, Outcome, ResultPayload, SuccessCallback, WireMessage};
use crate::backend::{BackendVerifier, CancellationSignal, HttpTransport};
use crate::codec::decode_token;
use crate::config::LaunchOptions;
use crate::error::HandshakeError;
use crate::policy::{normalize_session, sanitize_include_list, BackendUrlPolicy, IncludeList};

/// How the run loop ended; turned into callbacks only after every timer
/// future and the listener have been dropped.
enum Verdict {
    Success {
        credential: String,
        payload: ResultPayload,
        backend_result: Value,
    },
    Failure(HandshakeError),
    CancelledByUser,
}

pub struct HandshakeController<H: HostEnvironment, T> {
    host: H,
    verifier: BackendVerifier<T>,
    options: LaunchOptions,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    session: String,
    include: Option<IncludeList>,
    state: HandshakeState,
    child: Option<H::Child>,
    cancel: CancellationSignal,
}

impl<H: HostEnvironment, T: HttpTransport> HandshakeController<H, T> {
    /// Normalizes the session and include list up front; nothing is opened
    /// until [`run`](Self::run).
    pub fn new(host: H, transport: T, config: HandshakeConfig) -> Self {
        let HandshakeConfig {
            options,
            on_success,
            on_failure,
        } = config;
        let session = normalize_session(options.session.as_deref());
        let include = options.include.as_ref().and_then(sanitize_include_list);

        Self {
            host,
            verifier: BackendVerifier::new(transport),
            options,
            on_success,
            on_failure,
            session,
            include,
            state: HandshakeState::new(),
            child: None,
            cancel: CancellationSignal::new(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Drive the handshake to a terminal state.
    ///
    /// Fires at most one callback. `CancelledByUser` and `Redirected` fire
    /// none.
    pub async fn run(mut self) -> Outcome {
        if !self.host.has_no_referrer_policy() {
            if self.options.require_no_referrer {
                return self.finish(Verdict::Failure(HandshakeError::ReferrerPolicyMissing));
            }
            self.host
                .warn("page has no \"no-referrer\" referrer policy; the issuer may see the page URL");
        }

        let url = build_child_url(&self.session, self.include.as_ref());
        let features = popup_features(&self.host.screen_geometry());
        match self.host.open_child(&url, &features) {
            Some(child) => {
                self.child = Some(child);
                self.state.opened();
            }
            None if self.options.allow_full_page_fallback => {
                tracing::debug!("popup blocked; falling back to full-page navigation");
                if let Err(e) = self.host.navigate(&url) {
                    return self.finish(Verdict::Failure(e));
                }
                self.state.terminate(Outcome::Redirected);
                return Outcome::Redirected;
            }
            None => return self.finish(Verdict::Failure(HandshakeError::PopupBlocked)),
        }

        let mut messages = match self.host.listen() {
            Ok(subscription) => subscription,
            Err(e) => return self.finish(Verdict::Failure(e)),
        };
        self.state.listening();

        let verdict = self.listen(&mut messages).await;
        messages.detach();
        self.finish(verdict)
    }

    // ========================================================================
    // Listening / Processing
    // ========================================================================

    async fn listen(&self, messages: &mut MessageSubscription) -> Verdict {
        let poll_interval = self.options.poll_interval();
        let mut deadline = self.deadline();
        let mut tick: Sleep<'_> = self.host.sleep(poll_interval);
        let mut channel_open = true;

        loop {
            tokio::select! {
                biased;
                _ = deadline.as_mut() => return self.timed_out(),
                message = messages.recv(), if channel_open => match message {
                    Some(message) => {
                        if let Some(wire) = self.accept(message) {
                            return self.process(wire, &mut deadline, messages).await;
                        }
                    }
                    None => {
                        tracing::debug!("message channel closed by host");
                        channel_open = false;
                    }
                },
                _ = tick.as_mut() => {
                    if self.state.accepts_user_close() && self.child_closed() {
                        return Verdict::CancelledByUser;
                    }
                    tick = self.host.sleep(poll_interval);
                }
            }
        }
    }

    /// Run decode and optional backend verification while still honoring the
    /// timeout. Messages arriving meanwhile are dropped, not queued.
    async fn process(
        &self,
        wire: WireMessage,
        deadline: &mut Sleep<'_>,
        messages: &mut MessageSubscription,
    ) -> Verdict {
        let work = self.complete(wire);
        tokio::pin!(work);

        loop {
            tokio::select! {
                biased;
                result = &mut work => return match result {
                    Ok((credential, payload, backend_result)) => Verdict::Success {
                        credential,
                        payload,
                        backend_result,
                    },
                    Err(e) => Verdict::Failure(e),
                },
                _ = deadline.as_mut() => return self.timed_out(),
                Some(_) = messages.recv() => {
                    tracing::debug!("dropping message received while processing");
                }
            }
        }
    }

    async fn complete(
        &self,
        wire: WireMessage,
    ) -> Result<(String, ResultPayload, Value), HandshakeError> {
        let credential = decode_token(&wire.token, &self.options.limits)?;
        tracing::debug!(credential_len = credential.len(), "token decoded");

        let payload = ResultPayload {
            include: self.include.clone(),
            session: self.session.clone(),
            authentication_response: wire.authentication_response,
        };

        let backend_result = match &self.options.backend_verify_url {
            Some(url) => {
                self.verifier
                    .verify(
                        url,
                        &self.backend_policy(),
                        &credential,
                        &payload,
                        &self.options.backend_extra_headers,
                        &self.cancel,
                    )
                    .await?
            }
            None => Value::Null,
        };

        Ok((credential, payload, backend_result))
    }

    /// Filter noise on the shared channel. Only messages from the issuer
    /// origin and our own child context are considered at all.
    fn accept(&self, message: InboundMessage) -> Option<WireMessage> {
        if message.origin != ISSUER_ORIGIN {
            return None;
        }
        let child = self.child.as_ref()?;
        if message.source != Some(child.id()) {
            return None;
        }

        match WireMessage::parse(message.data, &self.session) {
            Ok(wire) => {
                if self.state.begin_processing() {
                    Some(wire)
                } else {
                    None
                }
            }
            Err(reason) => {
                tracing::warn!(%reason, "ignoring issuer message");
                None
            }
        }
    }

    fn deadline(&self) -> Sleep<'_> {
        match self.options.timeout() {
            Some(timeout) => self.host.sleep(timeout),
            None => Box::pin(std::future::pending()),
        }
    }

    fn timed_out(&self) -> Verdict {
        let timeout_ms = self.options.timeout().map_or(0, |t| t.as_millis() as u64);
        Verdict::Failure(HandshakeError::Timeout { timeout_ms })
    }

    fn child_closed(&self) -> bool {
        self.child.as_ref().map_or(true, |child| child.is_closed())
    }

    fn backend_policy(&self) -> BackendUrlPolicy {
        let page = self.host.page_location();
        BackendUrlPolicy {
            page_href: page.href,
            page_origin: page.origin,
            allow_cross_origin: self.options.backend_verify_allow_cross_origin,
            allowed_origins: self.options.backend_verify_allowed_origins.clone(),
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Enter the terminal state, release resources, then notify the caller.
    fn finish(mut self, verdict: Verdict) -> Outcome {
        let outcome = match &verdict {
            Verdict::Success { .. } => Outcome::Success,
            Verdict::Failure(e) => Outcome::Failure(e.kind()),
            Verdict::CancelledByUser => Outcome::CancelledByUser,
        };
        if !self.state.terminate(outcome) {
            return outcome;
        }

        self.cancel.cancel();
        if let Some(child) = self.child.take() {
            if !child.is_closed() {
                child.close();
            }
        }

        match verdict {
            Verdict::Success {
                credential,
                payload,
                backend_result,
            } => {
                if let Some(on_success) = self.on_success.take() {
                    guarded("onSuccess", move || on_success(credential, payload, backend_result));
                }
            }
            Verdict::Failure(error) => match self.on_failure.take() {
                Some(on_failure) => guarded("onFailure", move || on_failure(error)),
                None => tracing::warn!("handshake failed with no onFailure callback: {error}"),
            },
            Verdict::CancelledByUser => {
                tracing::debug!("child context closed before completion; no callback fired");
            }
        }
        outcome
    }
}

/// Run caller code so that a panic is logged instead of unwinding into the
/// controller.
fn guarded(name: &str, callback: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("{name} callback panicked");
    }
}

/// Build a controller for `config` and run it to completion.
pub async fn launch<H, T>(host: H, transport: T, config: HandshakeConfig) -> Outcome
where
    H: HostEnvironment,
    T: HttpTransport,
{
    HandshakeController::new(host, transport, config).run().await
}
