//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use jamrelay_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use jamrelay_core::types::{DEFAULT_CHANNELS, DEFAULT_SEED_CHANNEL, DEFAULT_SEED_NODES};

use crate::reporter::DEFAULT_REPORT_INTERVAL;
use crate::roster::DEFAULT_WRITE_TIMEOUT;
use crate::server::DEFAULT_SHUTDOWN_TIMEOUT;

const DEFAULT_REPORT_INTERVAL_MS: u64 = DEFAULT_REPORT_INTERVAL.as_millis() as u64;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = DEFAULT_WRITE_TIMEOUT.as_millis() as u64;
const DEFAULT_NODE_INTERVAL_MS: u64 = 10_000;
const DEFAULT_SCREEN_WIDTH: u32 = 1250;
const DEFAULT_SCREEN_HEIGHT: u32 = 1000;

#[derive(Parser)]
#[command(name = "jamrelay", about = "Mesh channel-selection relay")]
pub struct Cli {
    /// Relay host to bind (serve) or connect to (node, send)
    #[arg(long, global = true, env = "JAMRELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Relay TCP port
    #[arg(long, short = 'p', global = true, env = "JAMRELAY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// SQLite database path
    #[arg(long, global = true, env = "JAMRELAY_DB", default_value = "jamrelay.db")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// `host:port`, bracketing bare IPv6 hosts.
    pub fn addr(&self) -> String {
        format_addr(&self.host, self.port)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay server (default when no subcommand given)
    Serve(ServeOpts),
    /// Simulate a mesh node that hops channels and prints broadcasts
    Node(NodeOpts),
    /// Send one JSON message to the relay
    Send(SendOpts),
    /// Print the current contents of the store
    Snapshot(SnapshotOpts),
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpts {
    /// Nodes written to the store at startup
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_SEED_NODES)]
    pub seed_nodes: Vec<i64>,

    /// Channel every seeded node starts on
    #[arg(long, default_value_t = DEFAULT_SEED_CHANNEL)]
    pub seed_channel: i64,

    /// Channels seeded with a zero quality row
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_CHANNELS)]
    pub channels: Vec<i64>,

    /// Keep existing store contents instead of resetting and seeding
    #[arg(long)]
    pub keep_state: bool,

    /// Store polling interval for the change reporter in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_REPORT_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub report_interval_ms: u64,

    /// Disable the change reporter
    #[arg(long)]
    pub no_reporter: bool,

    /// Upper bound on waiting for connection handlers at shutdown
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_MS)]
    pub shutdown_timeout_ms: u64,

    /// Per-peer write timeout during broadcast fan-out
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT_MS)]
    pub write_timeout_ms: u64,

    /// Longest accepted message line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    #[command(flatten)]
    pub display: DisplayOpts,
}

impl Default for ServeOpts {
    fn default() -> Self {
        Self {
            seed_nodes: DEFAULT_SEED_NODES.to_vec(),
            seed_channel: DEFAULT_SEED_CHANNEL,
            channels: DEFAULT_CHANNELS.to_vec(),
            keep_state: false,
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            no_reporter: false,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            display: DisplayOpts::default(),
        }
    }
}

/// Options for the display process composed with the relay. Accepted and
/// logged; the relay itself renders nothing.
#[derive(Args, Debug, Clone)]
pub struct DisplayOpts {
    /// Screen width in pixels
    #[arg(long, default_value_t = DEFAULT_SCREEN_WIDTH)]
    pub screen_width: u32,

    /// Screen height in pixels
    #[arg(long, default_value_t = DEFAULT_SCREEN_HEIGHT)]
    pub screen_height: u32,

    /// Full screen mode
    #[arg(long)]
    pub full_screen: bool,
}

impl Default for DisplayOpts {
    fn default() -> Self {
        Self {
            screen_width: DEFAULT_SCREEN_WIDTH,
            screen_height: DEFAULT_SCREEN_HEIGHT,
            full_screen: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NodeOpts {
    /// Node id reported in channel_switch messages
    #[arg(long)]
    pub node_id: i64,

    /// Delay between channel switches in milliseconds
    #[arg(long, default_value_t = DEFAULT_NODE_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Channels to pick from
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_CHANNELS)]
    pub channels: Vec<i64>,

    /// Stop after this many switches (default: run until ctrl-c)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SendOpts {
    /// JSON document, e.g. '{"action":"broadcast","channel":44}'
    pub message: String,
}

#[derive(Args, Debug, Clone)]
pub struct SnapshotOpts {
    /// Print JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

fn format_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_uses_defaults() {
        let cli = Cli::try_parse_from(["jamrelay"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, 8000);
        assert_eq!(cli.addr(), "127.0.0.1:8000");
    }

    #[test]
    fn serve_defaults_match_default_impl() {
        let cli = Cli::try_parse_from(["jamrelay", "serve"]).unwrap();
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        let defaults = ServeOpts::default();
        assert_eq!(opts.seed_nodes, defaults.seed_nodes);
        assert_eq!(opts.channels, defaults.channels);
        assert_eq!(opts.seed_channel, defaults.seed_channel);
        assert_eq!(opts.report_interval_ms, defaults.report_interval_ms);
        assert_eq!(opts.shutdown_timeout_ms, defaults.shutdown_timeout_ms);
        assert_eq!(opts.max_frame_bytes, defaults.max_frame_bytes);
        assert_eq!(opts.display.screen_width, 1250);
        assert!(!opts.display.full_screen);
    }

    #[test]
    fn serve_accepts_display_and_seed_options() {
        let cli = Cli::try_parse_from([
            "jamrelay",
            "serve",
            "--port",
            "9000",
            "--seed-nodes",
            "4,5",
            "--channels",
            "36,40",
            "--full-screen",
            "--screen-width",
            "800",
            "--keep-state",
        ])
        .unwrap();
        assert_eq!(cli.port, 9000);
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.seed_nodes, vec![4, 5]);
        assert_eq!(opts.channels, vec![36, 40]);
        assert!(opts.keep_state);
        assert!(opts.display.full_screen);
        assert_eq!(opts.display.screen_width, 800);
    }

    #[test]
    fn node_requires_node_id() {
        assert!(Cli::try_parse_from(["jamrelay", "node"]).is_err());
        let cli = Cli::try_parse_from(["jamrelay", "node", "--node-id", "2", "--count", "3"]).unwrap();
        let Some(Command::Node(opts)) = cli.command else {
            panic!("expected node");
        };
        assert_eq!(opts.node_id, 2);
        assert_eq!(opts.count, Some(3));
        assert_eq!(opts.interval_ms, 10_000);
    }

    #[test]
    fn zero_report_interval_is_rejected() {
        assert!(Cli::try_parse_from(["jamrelay", "serve", "--report-interval-ms", "0"]).is_err());
        let cli = Cli::try_parse_from(["jamrelay", "serve", "--report-interval-ms", "1"]).unwrap();
        let Some(Command::Serve(opts)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(opts.report_interval_ms, 1);
    }

    #[test]
    fn zero_count_is_rejected() {
        assert!(Cli::try_parse_from(["jamrelay", "node", "--node-id", "1", "--count", "0"]).is_err());
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(format_addr("::1", 8000), "[::1]:8000");
        assert_eq!(format_addr("[::1]", 8000), "[::1]:8000");
        assert_eq!(format_addr("localhost", 1), "localhost:1");
    }
}
