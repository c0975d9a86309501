//! Transport codec for raw audio buffers.
//!
//! The live session carries binary audio inside JSON text frames, so every
//! payload crosses the wire base64-encoded. Encoding is total; decoding fails
//! on anything outside the standard alphabet or with broken padding, and a
//! decode failure must never reach the playback path as noise.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{EmoBotError, Result};

/// Encode raw bytes as standard base64 text.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64 text back into raw bytes.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| EmoBotError::InvalidEncoding(e.to_string()))
}
