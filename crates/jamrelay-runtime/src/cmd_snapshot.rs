//! `jamrelay snapshot`: print the store contents as tables or JSON.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use jamrelay_core::StoreSnapshot;
use jamrelay_store::Store;

#[derive(Serialize)]
struct SnapshotJson<'a> {
    fetched_at: String,
    #[serde(flatten)]
    snapshot: &'a StoreSnapshot,
}

pub fn cmd_snapshot(db: &Path, json: bool) -> anyhow::Result<()> {
    if !db.exists() {
        anyhow::bail!("no store at {}", db.display());
    }
    let store = Store::open_read_only(db)
        .with_context(|| format!("failed to open store at {}", db.display()))?;
    let snapshot = store.snapshot().context("failed to read store")?;

    if json {
        println!("{}", snapshot_json(&snapshot)?);
    } else {
        print!("{}", format_snapshot(&snapshot));
    }
    Ok(())
}

fn snapshot_json(snapshot: &StoreSnapshot) -> anyhow::Result<String> {
    let doc = SnapshotJson {
        fetched_at: chrono::Utc::now().to_rfc3339(),
        snapshot,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

pub(crate) fn format_snapshot(snapshot: &StoreSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "NODE  CHANNEL");
    if snapshot.nodes.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for node in &snapshot.nodes {
        let _ = writeln!(out, "{:<5} {}", node.node_id, node.channel);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "CHANNEL  QUALITY");
    if snapshot.channels.is_empty() {
        let _ = writeln!(out, "(none)");
    }
    for channel in &snapshot.channels {
        let _ = writeln!(out, "{:<8} {:.3}", channel.channel, channel.quality);
    }
    out
}
