//! Bounded decoding of issuer tokens.
//!
//! Wire format: `base64url(gzip(hex(credential)))`. Every stage checks its
//! output against a ceiling before the next stage runs, so an adversarial
//! child context cannot use the token to amplify memory or CPU use.

use std::io::Read;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ceiling on token length in characters.
pub const DEFAULT_MAX_TOKEN_CHARS: usize = 64_000;

/// Default ceiling on base64-decoded (still compressed) bytes.
pub const DEFAULT_MAX_DECODED_BYTES: usize = 64_000;

/// Default ceiling on inflated hex characters.
pub const DEFAULT_MAX_INFLATED_CHARS: usize = 512_000;

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Size ceilings applied while decoding a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecodeLimits {
    pub max_token_chars: usize,
    pub max_decoded_bytes: usize,
    pub max_inflated_chars: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_token_chars: DEFAULT_MAX_TOKEN_CHARS,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
            max_inflated_chars: DEFAULT_MAX_INFLATED_CHARS,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Token is empty")]
    EmptyToken,

    #[error("Token too long: {len} characters exceeds limit of {max}")]
    TokenTooLong { len: usize, max: usize },

    #[error("Token has invalid base64url length (remainder {remainder} after padding normalization)")]
    InvalidPadding { remainder: usize },

    #[error("Token is not valid base64url: {0}")]
    InvalidBase64(String),

    #[error("Decoded token too large: {len} bytes exceeds limit of {max}")]
    DecodedTooLarge { len: usize, max: usize },

    #[error("Token decompression failed: {0}")]
    Decompress(String),

    #[error("Decompressed token exceeds limit of {max} characters")]
    InflatedTooLarge { max: usize },

    #[error("Hex payload is empty")]
    EmptyHex,

    #[error("Hex payload too long: {len} characters exceeds limit of {max}")]
    HexTooLong { len: usize, max: usize },

    #[error("Hex payload has odd length {len}")]
    OddHexLength { len: usize },

    #[error("Hex payload has a non-hex character at index {index}")]
    InvalidHex { index: usize },

    #[error("Credential is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Decode a base64url token into compressed bytes.
///
/// Accepts padded or unpadded input. Unpadded remainders of 2 and 3 are
/// padded; a remainder of 1 can never be valid and is rejected.
pub fn decode_base64url(token: &str, limits: &DecodeLimits) -> Result<Vec<u8>, CodecError> {
    if token.is_empty() {
        return Err(CodecError::EmptyToken);
    }
    if token.len() > limits.max_token_chars {
        return Err(CodecError::TokenTooLong {
            len: token.len(),
            max: limits.max_token_chars,
        });
    }

    let mut normalized: String = token
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    match normalized.len() % 4 {
        0 => {}
        2 => normalized.push_str("=="),
        3 => normalized.push('='),
        remainder => return Err(CodecError::InvalidPadding { remainder }),
    }

    let bytes = LENIENT_STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;

    if bytes.len() > limits.max_decoded_bytes {
        return Err(CodecError::DecodedTooLarge {
            len: bytes.len(),
            max: limits.max_decoded_bytes,
        });
    }
    Ok(bytes)
}

/// Gunzip `bytes` into a hex string, stopping as soon as the inflated size
/// passes `limits.max_inflated_chars`.
pub fn inflate_hex(bytes: &[u8], limits: &DecodeLimits) -> Result<String, CodecError> {
    let max = limits.max_inflated_chars;
    let mut inflated = Vec::new();
    GzDecoder::new(bytes)
        .take(max as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;

    if inflated.len() > max {
        return Err(CodecError::InflatedTooLarge { max });
    }
    String::from_utf8(inflated).map_err(|e| CodecError::InvalidHex {
        index: e.utf8_error().valid_up_to(),
    })
}

/// Decode a hex string into UTF-8 text.
pub fn hex_to_text(hex: &str, limits: &DecodeLimits) -> Result<String, CodecError> {
    if hex.is_empty() {
        return Err(CodecError::EmptyHex);
    }
    if hex.len() > limits.max_inflated_chars {
        return Err(CodecError::HexTooLong {
            len: hex.len(),
            max: limits.max_inflated_chars,
        });
    }
    if hex.len() % 2 != 0 {
        return Err(CodecError::OddHexLength { len: hex.len() });
    }
    if let Some(index) = hex.bytes().position(|b| !b.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidHex { index });
    }

    let bytes = hex::decode(hex).map_err(|_| CodecError::InvalidHex { index: 0 })?;
    String::from_utf8(bytes).map_err(|e| CodecError::InvalidUtf8(e.utf8_error().to_string()))
}

/// Gunzip then hex-decode a compressed payload into the credential string.
pub fn decompress_and_decode_hex(bytes: &[u8], limits: &DecodeLimits) -> Result<String, CodecError> {
    let hex = inflate_hex(bytes, limits)?;
    hex_to_text(&hex, limits)
}

/// Run the full pipeline: base64url, gunzip, hex, UTF-8.
pub fn decode_token(token: &str, limits: &DecodeLimits) -> Result<String, CodecError> {
    let compressed = decode_base64url(token, limits)?;
    decompress_and_decode_hex(&compressed, limits)
}
