//! Error taxonomy for the relay runtime.

use jamrelay_core::ProtocolError;
use jamrelay_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The listener could not be created. The only fatal error.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Peer reset, closed, or otherwise unreachable.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}
