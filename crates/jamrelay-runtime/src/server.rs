//! TCP acceptor: bind, accept, spawn one handler per connection, and drive
//! graceful shutdown.
//!
//! Protocol: newline-delimited JSON over TCP (see `jamrelay_core::protocol`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use jamrelay_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use jamrelay_store::Store;

use crate::error::RelayError;
use crate::handler::{ConnectionHandler, HandlerContext};
use crate::roster::{DEFAULT_WRITE_TIMEOUT, Roster};

/// Default upper bound on waiting for handlers during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on.
    pub addr: String,
    pub max_frame_bytes: usize,
    pub write_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Relay server owning the live-connection roster.
pub struct RelayServer {
    config: ServerConfig,
    store: Arc<Store>,
    roster: Arc<Roster>,
    /// Cancellation token for graceful shutdown.
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl RelayServer {
    pub fn new(config: ServerConfig, store: Arc<Store>, cancel: CancellationToken) -> Self {
        let roster = Arc::new(Roster::new(config.write_timeout));
        Self {
            config,
            store,
            roster,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    #[cfg(test)]
    pub fn roster(&self) -> Arc<Roster> {
        Arc::clone(&self.roster)
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), RelayError> {
        let bind_err = |source: std::io::Error| RelayError::Bind {
            addr: self.config.addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.config.addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        tracing::info!(addr = %local_addr, "relay server listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener, then shut down once the
    /// cancellation token fires.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_handler(stream, peer).await,
                        Err(e) => {
                            tracing::error!(error = %e, "TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("relay server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        // Stop accepting before tearing down live connections.
        drop(listener);
        self.shutdown().await;
    }

    async fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let close = self.cancel.child_token();
        let id = self.roster.register(peer, writer, close.clone()).await;

        let ctx = HandlerContext {
            store: Arc::clone(&self.store),
            roster: Arc::clone(&self.roster),
            max_frame_bytes: self.config.max_frame_bytes,
        };
        let handler = ConnectionHandler::new(id, peer, ctx, close);
        self.tracker.spawn(handler.run(reader));
    }

    async fn shutdown(&self) {
        self.tracker.close();
        let closed = self.roster.close_all().await;
        tracing::info!(closed, "closed live connections");

        match tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => tracing::info!("all connection handlers finished"),
            Err(_) => tracing::warn!(
                remaining = self.tracker.len(),
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "connection handlers still running after shutdown timeout"
            ),
        }
    }
}

/// Resolve on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler, ctrl-c only");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
