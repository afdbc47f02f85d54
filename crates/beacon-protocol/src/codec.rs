//! Codec for the Beacon wire protocol.
//!
//! Frames are JSON text messages over a persistent bidirectional transport;
//! there is no additional length framing because the transport (WebSocket)
//! already delimits messages.

use thiserror::Error;

use crate::events::{ClientFrame, ServerEvent};

/// Maximum accepted inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound client frame from JSON text.
///
/// Unknown `type` tags decode to [`ClientFrame::Unknown`]; only malformed
/// JSON (or a known tag with malformed fields) is an error.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode an outbound server event to JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}
