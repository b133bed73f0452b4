//! Transport codec.
//! The Contents API stores file bodies as base64 inside a JSON string field,
//! line-wrapped by the backend for long payloads. Encode/decode are mutually
//! inverse for all UTF-8 input; decode strips the wrapping newlines first.

use base64::{Engine as _, engine::general_purpose};

use crate::error::{Result, SyncError};

/// Encodes a UTF-8 text document into the transport's base64 form.
pub fn encode(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

/// Decodes a base64 payload back into the original UTF-8 text.
///
/// The backend wraps long payloads with embedded newlines; those are not
/// part of the content and are removed before decoding. Malformed base64
/// and non-UTF-8 bytes both fail with `SyncError::Decode`.
pub fn decode(payload: &str) -> Result<String> {
    let compact: String = payload
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();
    let bytes = general_purpose::STANDARD.decode(compact.as_bytes())?;
    String::from_utf8(bytes).map_err(Into::into)
}
