//! Background reporter: poll the store and log rows that changed since the
//! previous poll. Observability only; failures never reach the acceptor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use jamrelay_core::{ChannelQuality, NodeChannelAssignment, StoreSnapshot};
use jamrelay_store::Store;

use crate::error::RelayError;
use crate::handler::with_store;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// `tokio::time::interval` panics on a zero period.
const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(1);

pub struct Reporter {
    store: Arc<Store>,
    interval: Duration,
    last: Option<StoreSnapshot>,
}

impl Reporter {
    pub fn new(store: Arc<Store>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            last: None,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval.max(MIN_REPORT_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("reporter stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "reporter poll failed");
            }
        }
    }

    /// Fetch both relations and log what changed. Returns whether anything did.
    pub async fn poll_once(&mut self) -> Result<bool, RelayError> {
        let snapshot = with_store(&self.store, |store| store.snapshot()).await?;
        if self.last.as_ref() == Some(&snapshot) {
            return Ok(false);
        }

        let (nodes, channels) = changed_rows(self.last.as_ref(), &snapshot);
        for node in &nodes {
            tracing::info!(node_id = node.node_id, channel = node.channel, "node channel");
        }
        for channel in &channels {
            tracing::info!(
                channel = channel.channel,
                quality = channel.quality,
                "channel quality"
            );
        }
        self.last = Some(snapshot);
        Ok(true)
    }
}

/// Rows of `next` that are new or different compared with `prev`. With no
/// previous poll every row counts as changed.
fn changed_rows(
    prev: Option<&StoreSnapshot>,
    next: &StoreSnapshot,
) -> (Vec<NodeChannelAssignment>, Vec<ChannelQuality>) {
    let Some(prev) = prev else {
        return (next.nodes.clone(), next.channels.clone());
    };

    let nodes = next
        .nodes
        .iter()
        .filter(|n| prev.node_channel(n.node_id) != Some(n.channel))
        .copied()
        .collect();
    let channels = next
        .channels
        .iter()
        .filter(|c| prev.channel_quality(c.channel) != Some(c.quality))
        .copied()
        .collect();
    (nodes, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_id: i64, channel: i64) -> NodeChannelAssignment {
        NodeChannelAssignment { node_id, channel }
    }

    #[test]
    fn first_poll_reports_every_row() {
        let next = StoreSnapshot {
            nodes: vec![node(1, 40), node(2, 40)],
            channels: vec![ChannelQuality { channel: 36, quality: 0.0 }],
        };
        let (nodes, channels) = changed_rows(None, &next);
        assert_eq!(nodes.len(), 2);
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn only_changed_rows_are_reported() {
        let prev = StoreSnapshot {
            nodes: vec![node(1, 40), node(2, 40)],
            channels: vec![
                ChannelQuality { channel: 36, quality: 0.1 },
                ChannelQuality { channel: 40, quality: 0.2 },
            ],
        };
        let next = StoreSnapshot {
            nodes: vec![node(1, 40), node(2, 149), node(3, 44)],
            channels: vec![
                ChannelQuality { channel: 36, quality: 0.1 },
                ChannelQuality { channel: 40, quality: 0.8 },
            ],
        };
        let (nodes, channels) = changed_rows(Some(&prev), &next);
        assert_eq!(nodes, vec![node(2, 149), node(3, 44)]);
        assert_eq!(channels, vec![ChannelQuality { channel: 40, quality: 0.8 }]);
    }

    #[tokio::test]
    async fn poll_reports_only_on_content_change() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.upsert_node_channel(1, 40).unwrap();
        let mut reporter = Reporter::new(Arc::clone(&store), DEFAULT_REPORT_INTERVAL);

        assert!(reporter.poll_once().await.unwrap(), "first poll always reports");
        assert!(!reporter.poll_once().await.unwrap(), "nothing changed");

        // Rewriting the same value is not a change.
        store.upsert_node_channel(1, 40).unwrap();
        assert!(!reporter.poll_once().await.unwrap());

        store.upsert_node_channel(1, 44).unwrap();
        assert!(reporter.poll_once().await.unwrap());
        assert!(!reporter.poll_once().await.unwrap());
    }

    #[tokio::test]
    async fn zero_interval_does_not_kill_the_reporter() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reporter = Reporter::new(store, Duration::ZERO);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reporter should stop within timeout");
        assert!(result.is_ok(), "reporter task panicked");
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let reporter = Reporter::new(store, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "reporter should stop within timeout");
    }
}
