//! Live connection roster and broadcast fan-out.
//!
//! The acceptor registers every accepted socket here; handlers remove
//! themselves on exit, fan-out removes peers it cannot write to, and
//! shutdown drains the whole set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use jamrelay_core::protocol::to_wire;

/// Roster-unique connection id, assigned at registration.
pub type ConnId = u64;

/// Default bound on a single peer write during fan-out.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct Peer {
    addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Cancelled when the peer leaves the roster so its handler stops reading.
    close: CancellationToken,
}

pub struct Roster {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnId, Peer>>,
    write_timeout: Duration,
}

impl Roster {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            peers: Mutex::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Add a connection's write half. `close` is cancelled when the peer is
    /// removed for any reason.
    pub async fn register(
        &self,
        addr: SocketAddr,
        writer: OwnedWriteHalf,
        close: CancellationToken,
    ) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Peer {
            addr,
            writer: Arc::new(Mutex::new(writer)),
            close,
        };
        let total = {
            let mut peers = self.peers.lock().await;
            peers.insert(id, peer);
            peers.len()
        };
        tracing::debug!(conn_id = id, peer = %addr, total, "peer registered");
        id
    }

    /// Drop a peer and signal its handler. Returns false if it was already gone.
    pub async fn remove(&self, id: ConnId) -> bool {
        let removed = self.peers.lock().await.remove(&id);
        match removed {
            Some(peer) => {
                peer.close.cancel();
                tracing::debug!(conn_id = id, peer = %peer.addr, "peer removed");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    #[cfg(test)]
    pub async fn contains(&self, id: ConnId) -> bool {
        self.peers.lock().await.contains_key(&id)
    }

    /// Write `frame` to every peer except `sender`. Returns how many peers
    /// accepted the write.
    ///
    /// Works on a snapshot of the roster; the lock is not held while writing.
    /// A peer whose write fails or times out is removed and delivery carries
    /// on with the rest.
    pub async fn broadcast(&self, sender: ConnId, frame: &str) -> usize {
        let targets: Vec<(ConnId, Peer)> = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .filter(|(id, _)| **id != sender)
                .map(|(id, peer)| (*id, peer.clone()))
                .collect()
        };

        let wire = to_wire(frame);
        let mut delivered = 0;
        for (id, peer) in targets {
            match self.write_to(&peer, &wire).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        conn_id = id,
                        peer = %peer.addr,
                        error = %e,
                        "broadcast write failed, dropping peer"
                    );
                    self.remove(id).await;
                }
            }
        }
        delivered
    }

    async fn write_to(&self, peer: &Peer, wire: &[u8]) -> std::io::Result<()> {
        let mut writer = peer.writer.lock().await;
        let write = async {
            writer.write_all(wire).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "peer write timed out",
            )),
        }
    }

    /// Empty the roster, cancel every handler and shut down every write half.
    /// Returns the number of connections closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Peer> = {
            let mut peers = self.peers.lock().await;
            peers.drain().map(|(_, peer)| peer).collect()
        };

        for peer in &drained {
            peer.close.cancel();
            let mut writer = peer.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(peer = %peer.addr, error = %e, "shutdown of closed peer failed");
            }
        }
        drained.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
