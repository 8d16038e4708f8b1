//! Client-side commands: a simulated mesh node and a one-shot sender.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use rand::seq::IndexedRandom;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{FramedRead, LinesCodec};

use jamrelay_core::protocol::{self, DEFAULT_MAX_FRAME_BYTES, Message, to_wire};
use jamrelay_core::ChannelSwitch;

use crate::cli::NodeOpts;

/// Connect as `opts.node_id`, report a random channel from `opts.channels`
/// every interval, and log every broadcast relayed to us.
pub async fn cmd_node(addr: &str, opts: &NodeOpts) -> anyhow::Result<()> {
    if opts.channels.is_empty() {
        anyhow::bail!("--channels must not be empty");
    }

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to relay at {addr}"))?;
    let (reader, mut writer) = stream.into_split();
    let node_id = opts.node_id;
    tracing::info!(node_id, addr = %addr, "node connected");

    let receiver = tokio::spawn(receive_loop(reader, node_id));
    let interval = Duration::from_millis(opts.interval_ms);
    let mut sent: u64 = 0;

    let done = |sent: u64| opts.count.is_some_and(|count| sent >= count);

    while !done(sent) {
        let channel = *opts
            .channels
            .choose(&mut rand::rng())
            .context("no channel to pick")?;
        let frame = Message::ChannelSwitch(ChannelSwitch { node_id, channel }).to_frame()?;
        writer
            .write_all(&to_wire(&frame))
            .await
            .context("relay connection lost")?;
        sent += 1;
        tracing::info!(node_id, channel, "sent channel switch");

        if done(sent) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping node");
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::debug!(error = %e, "failed to shut down relay connection");
    }
    receiver.abort();
    Ok(())
}

async fn receive_loop(reader: OwnedReadHalf, node_id: i64) {
    let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(DEFAULT_MAX_FRAME_BYTES));
    while let Some(next) = frames.next().await {
        match next {
            Ok(line) => match protocol::decode(&line) {
                Ok(Message::Broadcast(frame)) => {
                    tracing::info!(node_id, message = %frame, "received broadcast");
                }
                Ok(other) => {
                    tracing::debug!(node_id, action = other.kind(), "ignoring relayed message");
                }
                Err(e) => {
                    tracing::warn!(node_id, error = %e, "unreadable message from relay");
                }
            },
            Err(e) => {
                tracing::warn!(node_id, error = %e, "relay read failed");
                return;
            }
        }
    }
    tracing::info!(node_id, "relay closed the connection");
}

/// Validate `message` and send it to the relay as a single frame.
pub async fn cmd_send(addr: &str, message: &str) -> anyhow::Result<()> {
    let frame = prepare_frame(message)?;
    let kind = protocol::decode(&frame)?.kind().to_string();

    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to relay at {addr}"))?;
    stream.write_all(&to_wire(&frame)).await?;
    stream.shutdown().await?;

    println!("sent {kind}");
    Ok(())
}

/// Compact `message` onto one line and check the relay would accept it.
fn prepare_frame(message: &str) -> anyhow::Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(message).context("message is not valid JSON")?;
    let frame = serde_json::to_string(&value)?;
    protocol::decode(&frame).context("message would be rejected by the relay")?;
    Ok(frame)
}
