//! Error types for the wire protocol.

use thiserror::Error;

/// A frame that cannot be turned into a [`crate::Message`].
///
/// The relay closes the offending connection on any of these; nothing is
/// sent back to the peer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a json object, got {0}")]
    NotAnObject(&'static str),

    #[error("missing or non-string `action` field")]
    MissingAction,

    #[error("invalid `{action}` message: {detail}")]
    InvalidFields { action: &'static str, detail: String },

    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },
}
