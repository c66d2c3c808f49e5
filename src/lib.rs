//! Client core for the ageproof age-verification handshake.
//!
//! Opens the issuer in a second browsing context, accepts exactly one message
//! bound to the session, decodes the returned token under strict size limits,
//! and optionally forwards the credential to the relying party's backend.
//!
//! Browser APIs are reached only through [`handshake::HostEnvironment`] and
//! [`backend::HttpTransport`]; the `ageproof-wasm` crate provides both.

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod handshake;
pub mod policy;

pub use backend::{
    BackendError, BackendRequest, BackendResponse, BackendVerifier, CancellationSignal,
    HttpTransport,
};
#[cfg(feature = "reqwest")]
pub use backend::ReqwestTransport;
pub use codec::{
    decode_base64url, decode_token, decompress_and_decode_hex, hex_to_text, inflate_hex,
    CodecError, DecodeLimits,
};
pub use config::LaunchOptions;
pub use error::{ErrorKind, HandshakeError};
pub use handshake::{launch, HandshakeConfig, HandshakeController, Outcome, ResultPayload};
pub use policy::{
    is_valid_session, normalize_session, resolve_backend_url, sanitize_include_list,
    BackendUrlPolicy, IncludeList, PolicyError,
};
