//! Error types for QuizDuel payloads.

use thiserror::Error;

/// A payload could not be understood.
///
/// Protocol errors never change session state: the offending frame or
/// response is logged and dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding failed
    #[error("encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding failed
    #[error("decoding failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// Payload decoded but is not valid in context
    #[error("unexpected payload: {0}")]
    Unexpected(String),
}
