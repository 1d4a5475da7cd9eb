//! JSON codec for player states and session snapshots.
//!
//! Every frame is a complete, independent document; nothing here keeps state
//! between calls.

use crate::{PlayerState, SessionSnapshot, FRAME_DELIMITER};
use thiserror::Error;

/// Failure to turn a frame into a record or back
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed player state: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decodes one inbound player state payload
///
/// Missing keys, explicit `null` values and unknown keys are all accepted;
/// only malformed JSON or mistyped values fail.
pub fn decode_state(bytes: &[u8]) -> Result<PlayerState, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

/// Encodes a player state as sent by clients
pub fn encode_state(state: &PlayerState) -> Result<String, CodecError> {
    serde_json::to_string(state).map_err(CodecError::Encode)
}

/// Encodes a snapshot into the text sent to every member of a session
pub fn encode_snapshot(snapshot: &SessionSnapshot) -> Result<String, CodecError> {
    serde_json::to_string(snapshot).map_err(CodecError::Encode)
}

/// Decodes one snapshot received from the server
///
/// `text` must hold a single snapshot; use [`split_frame`] first on frames
/// that may carry several.
pub fn decode_snapshot(text: &str) -> Result<SessionSnapshot, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Decode)
}

/// Replaces embedded newlines with spaces and trims surrounding whitespace
pub fn normalize_frame(frame: &[u8]) -> Vec<u8> {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);

    frame[start..end]
        .iter()
        .map(|&b| if b == b'\n' { b' ' } else { b })
        .collect()
}

/// Splits a frame that may hold several coalesced snapshots
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(FRAME_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
}
