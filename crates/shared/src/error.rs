//! Shared error types.

use thiserror::Error;

/// Why an inbound frame could not be turned into a [`crate::ServerEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not JSON, or not an object with a string `type`.
    #[error("malformed frame: {0}")]
    Frame(#[source] serde_json::Error),
    /// The `type` is known but `data` does not have the expected shape.
    #[error("invalid `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// The message type the frame claimed, when it got that far.
    pub fn kind(&self) -> Option<&str> {
        match self {
            DecodeError::Frame(_) => None,
            DecodeError::Payload { kind, .. } => Some(kind),
        }
    }
}
