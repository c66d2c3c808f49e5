//! Cross-window handshake with the issuer.
//!
//! A [`HandshakeController`] opens the issuer's page in a child context,
//! waits for exactly one valid message from it, decodes the token, optionally
//! confirms it with the relying party's backend, and fires exactly one
//! terminal callback.

mod child;
mod controller;
mod host;
mod state;
mod types;

pub use child::{build_child_url, popup_features, ISSUER_ORIGIN, ISSUER_PATH, POPUP_HEIGHT, POPUP_WIDTH};
pub use controller::{launch, HandshakeController};
pub use host::{
    ChildContext, ContextId, HostEnvironment, InboundMessage, MessageSubscription, PageLocation,
    ScreenGeometry, Sleep,
};
pub use state::{HandshakeState, Phase};
pub use types::{
    FailureCallback, HandshakeConfig, Outcome, Rejection, ResultPayload, SuccessCallback,
    WireMessage,
};
