//! `jamrelay serve`: wires store → relay server → reporter and waits for a
//! shutdown signal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use jamrelay_store::{SeedPlan, Store};

use crate::cli::ServeOpts;
use crate::reporter::Reporter;
use crate::server::{RelayServer, ServerConfig, shutdown_signal};

pub async fn run_serve(addr: &str, db: &Path, opts: ServeOpts) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });
    run_serve_with(addr, db, opts, cancel).await
}

/// Run the relay until `cancel` fires. Returns `Err` only for startup
/// failures (store open, reset, bind).
pub async fn run_serve_with(
    addr: &str,
    db: &Path,
    opts: ServeOpts,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(
        addr = %addr,
        db = %db.display(),
        keep_state = opts.keep_state,
        reporter = !opts.no_reporter,
        "starting jamrelay"
    );
    tracing::debug!(
        screen_width = opts.display.screen_width,
        screen_height = opts.display.screen_height,
        full_screen = opts.display.full_screen,
        "display options (unused by the relay)"
    );

    let store = Store::open(db).with_context(|| format!("failed to open store at {}", db.display()))?;
    if !opts.keep_state {
        let plan = SeedPlan {
            nodes: opts.seed_nodes.clone(),
            node_channel: opts.seed_channel,
            channels: opts.channels.clone(),
        };
        store.reset().context("failed to reset store")?;
        store.seed(&plan).context("failed to seed store")?;
        tracing::info!(
            nodes = plan.nodes.len(),
            channels = plan.channels.len(),
            "store reset and seeded"
        );
    }
    let store = Arc::new(store);

    let config = ServerConfig {
        addr: addr.to_string(),
        max_frame_bytes: opts.max_frame_bytes,
        write_timeout: Duration::from_millis(opts.write_timeout_ms),
        shutdown_timeout: Duration::from_millis(opts.shutdown_timeout_ms),
    };
    let server = RelayServer::new(config, Arc::clone(&store), cancel.clone());

    let (listener, _local_addr) = match server.bind().await {
        Ok(bound) => bound,
        Err(e) => {
            tracing::error!(error = %e, "cannot start relay");
            return Err(e.into());
        }
    };

    let reporter_handle = if opts.no_reporter {
        None
    } else {
        let reporter = Reporter::new(
            Arc::clone(&store),
            Duration::from_millis(opts.report_interval_ms),
        );
        Some(tokio::spawn(reporter.run(cancel.clone())))
    };

    server.serve(listener).await;

    if let Some(handle) = reporter_handle {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "reporter task failed");
        }
    }

    tracing::info!("jamrelay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use jamrelay_core::NodeChannelAssignment;
    use jamrelay_core::types::DEFAULT_CHANNELS;

    use super::*;

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("relay.db")
    }

    fn opts() -> ServeOpts {
        ServeOpts {
            no_reporter: true,
            ..ServeOpts::default()
        }
    }

    /// Run with a token that is already cancelled: startup happens, then the
    /// server shuts straight down.
    async fn start_and_stop(db: &Path, opts: ServeOpts) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        cancel.cancel();
        run_serve_with("127.0.0.1:0", db, opts, cancel).await
    }

    #[tokio::test]
    async fn startup_resets_and_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        {
            let store = Store::open(&path).unwrap();
            store.upsert_node_channel(9, 165).unwrap();
        }

        start_and_stop(&path, opts()).await.unwrap();

        let snap = Store::open(&path).unwrap().snapshot().unwrap();
        assert_eq!(
            snap.nodes,
            vec![
                NodeChannelAssignment { node_id: 1, channel: 40 },
                NodeChannelAssignment { node_id: 2, channel: 40 },
                NodeChannelAssignment { node_id: 3, channel: 40 },
            ]
        );
        assert_eq!(snap.channels.len(), DEFAULT_CHANNELS.len());
    }

    #[tokio::test]
    async fn keep_state_skips_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        {
            let store = Store::open(&path).unwrap();
            store.upsert_node_channel(9, 165).unwrap();
        }

        let opts = ServeOpts {
            keep_state: true,
            ..opts()
        };
        start_and_stop(&path, opts).await.unwrap();

        let snap = Store::open(&path).unwrap().snapshot().unwrap();
        assert_eq!(snap.nodes, vec![NodeChannelAssignment { node_id: 9, channel: 165 }]);
        assert!(snap.channels.is_empty());
    }

    #[tokio::test]
    async fn address_in_use_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = run_serve_with(&addr, &db_path(&dir), opts(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(&addr), "got {err}");
    }

    #[tokio::test]
    async fn cancel_returns_ok_with_reporter_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        let cancel = CancellationToken::new();
        let opts = ServeOpts {
            report_interval_ms: 10,
            shutdown_timeout_ms: 500,
            ..ServeOpts::default()
        };

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { run_serve_with("127.0.0.1:0", &path, opts, cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("serve should stop after cancel")
            .unwrap();
        assert!(result.is_ok(), "got {result:?}");
    }
}
