//! Rows of the two persisted relations and the seed defaults.

use serde::{Deserialize, Serialize};

/// 5 GHz channel plan the demo mesh hops across.
pub const DEFAULT_CHANNELS: [i64; 9] = [36, 40, 44, 48, 149, 153, 157, 161, 165];

/// Nodes present in the store right after a reset.
pub const DEFAULT_SEED_NODES: [i64; 3] = [1, 2, 3];

/// Channel every seeded node starts on.
pub const DEFAULT_SEED_CHANNEL: i64 = 40;

/// Current channel of one mesh node. `node_id` is the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChannelAssignment {
    pub node_id: i64,
    pub channel: i64,
}

/// Latest quality estimate for one channel. `channel` is the key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelQuality {
    pub channel: i64,
    pub quality: f64,
}

/// Full contents of both relations, each ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub nodes: Vec<NodeChannelAssignment>,
    pub channels: Vec<ChannelQuality>,
}

impl StoreSnapshot {
    pub fn node_channel(&self, node_id: i64) -> Option<i64> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| n.channel)
    }

    pub fn channel_quality(&self, channel: i64) -> Option<f64> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_lookups() {
        let snap = StoreSnapshot {
            nodes: vec![
                NodeChannelAssignment { node_id: 1, channel: 40 },
                NodeChannelAssignment { node_id: 2, channel: 149 },
            ],
            channels: vec![ChannelQuality { channel: 36, quality: 0.25 }],
        };
        assert_eq!(snap.node_channel(2), Some(149));
        assert_eq!(snap.node_channel(9), None);
        assert_eq!(snap.channel_quality(36), Some(0.25));
        assert_eq!(snap.channel_quality(40), None);
    }

    #[test]
    fn snapshot_equality_is_content_based() {
        let a = StoreSnapshot {
            nodes: vec![NodeChannelAssignment { node_id: 1, channel: 40 }],
            channels: vec![],
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.nodes[0].channel = 44;
        assert_ne!(a, b);
    }

    #[test]
    fn default_seed_channel_is_in_plan() {
        assert!(DEFAULT_CHANNELS.contains(&DEFAULT_SEED_CHANNEL));
    }
}
