//! Per-connection handler: read frames, decode, dispatch.
//!
//! `Connected → Reading → Dispatching → Reading …` until EOF, a socket
//! error, a malformed frame, or the close token fires. Nothing is ever
//! written back to the sender.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use jamrelay_core::protocol::{self, Message};
use jamrelay_core::{NewEstimation, ProtocolError};
use jamrelay_store::{Store, StoreError};

use crate::error::RelayError;
use crate::roster::{ConnId, Roster};

/// Dependencies every handler shares.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<Store>,
    pub roster: Arc<Roster>,
    pub max_frame_bytes: usize,
}

/// Why a connection reached `Closed` without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Eof,
    /// Removed from the roster by shutdown or by fan-out.
    Closed,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Eof => "eof",
            CloseReason::Closed => "shutdown",
        }
    }
}

pub struct ConnectionHandler {
    id: ConnId,
    peer: SocketAddr,
    ctx: HandlerContext,
    close: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(id: ConnId, peer: SocketAddr, ctx: HandlerContext, close: CancellationToken) -> Self {
        Self {
            id,
            peer,
            ctx,
            close,
        }
    }

    /// Drive the connection to completion, then leave the roster.
    pub async fn run(self, reader: OwnedReadHalf) {
        tracing::debug!(conn_id = self.id, peer = %self.peer, "client connected");

        let mut frames = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(self.ctx.max_frame_bytes),
        );
        let outcome = self.read_loop(&mut frames).await;
        self.ctx.roster.remove(self.id).await;

        match outcome {
            Ok(reason) => {
                tracing::debug!(
                    conn_id = self.id,
                    peer = %self.peer,
                    reason = reason.as_str(),
                    "client disconnected"
                );
            }
            Err(RelayError::Protocol(e)) => {
                tracing::warn!(
                    conn_id = self.id,
                    peer = %self.peer,
                    reason = "protocol",
                    error = %e,
                    "malformed message, closing connection"
                );
            }
            Err(e) => {
                tracing::debug!(
                    conn_id = self.id,
                    peer = %self.peer,
                    reason = "io",
                    error = %e,
                    "read error, dropping client"
                );
            }
        }
    }

    async fn read_loop(
        &self,
        frames: &mut FramedRead<OwnedReadHalf, LinesCodec>,
    ) -> Result<CloseReason, RelayError> {
        loop {
            let next = tokio::select! {
                _ = self.close.cancelled() => return Ok(CloseReason::Closed),
                next = frames.next() => next,
            };

            let line = match next {
                None => return Ok(CloseReason::Eof),
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(self.frame_error(e)),
            };
            if line.trim().is_empty() {
                continue;
            }

            let message = protocol::decode(&line)?;
            self.dispatch(message).await;
        }
    }

    fn frame_error(&self, err: LinesCodecError) -> RelayError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong {
                max: self.ctx.max_frame_bytes,
            }
            .into(),
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                ProtocolError::InvalidUtf8.into()
            }
            LinesCodecError::Io(e) => RelayError::Connection(e),
        }
    }

    async fn dispatch(&self, message: Message) {
        match message {
            Message::ChannelSwitch(switch) => {
                let result = with_store(&self.ctx.store, move |store| {
                    store.upsert_node_channel(switch.node_id, switch.channel)
                })
                .await;
                match result {
                    Ok(()) => tracing::debug!(
                        conn_id = self.id,
                        node_id = switch.node_id,
                        channel = switch.channel,
                        "channel switch stored"
                    ),
                    Err(e) => tracing::warn!(
                        conn_id = self.id,
                        node_id = switch.node_id,
                        error = %e,
                        "failed to store channel switch"
                    ),
                }
            }
            Message::NewEstimation(estimation) => self.store_estimation(estimation).await,
            Message::Broadcast(frame) => {
                let delivered = self.ctx.roster.broadcast(self.id, &frame).await;
                tracing::debug!(conn_id = self.id, delivered, "broadcast relayed");
            }
            Message::Unknown(action) => {
                tracing::debug!(conn_id = self.id, action = %action, "ignoring unknown action");
            }
        }
    }

    async fn store_estimation(&self, estimation: NewEstimation) {
        if estimation.is_mismatched() {
            tracing::warn!(
                conn_id = self.id,
                channels = estimation.channels.len(),
                qualities = estimation.channel_quality.len(),
                "estimation length mismatch, truncating to shorter"
            );
        }
        let rows = estimation.pairs();
        if rows.is_empty() {
            return;
        }

        match with_store(&self.ctx.store, move |store| store.upsert_channel_qualities(&rows)).await
        {
            Ok(written) => {
                tracing::debug!(conn_id = self.id, written, "channel estimation stored");
            }
            Err(e) => {
                tracing::warn!(conn_id = self.id, error = %e, "failed to store channel estimation");
            }
        }
    }
}

/// Run a synchronous store call on the blocking pool.
pub(crate) async fn with_store<T, F>(store: &Arc<Store>, f: F) -> Result<T, RelayError>
where
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
}
