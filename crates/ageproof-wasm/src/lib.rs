//! WASM bindings for the ageproof handshake client.
//!
//! `launch` runs the full handshake against the real browser window; the
//! pure policy and codec helpers are exported for the presentational layer.

pub mod codec;
mod error;
pub mod handshake;
pub mod host;
pub mod policy;
pub mod transport;

pub use error::{named_error, to_js_error};
pub use host::WebHost;
pub use transport::FetchTransport;
