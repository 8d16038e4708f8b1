//! jamrelay: relay server for mesh channel-selection state.
//!
//! Nodes connect over TCP and exchange newline-delimited JSON. Channel
//! switches and quality estimates land in SQLite for an external reader;
//! broadcasts fan out to every other connected node.

use clap::Parser;

mod cli;
mod client;
mod cmd_snapshot;
mod error;
mod handler;
mod reporter;
mod roster;
mod serve;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so `snapshot` output stays pipeable.
    let filter = std::env::var("JAMRELAY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let addr = args.addr();
    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Serve(cli::ServeOpts::default()));

    match command {
        cli::Command::Serve(opts) => serve::run_serve(&addr, &args.db, opts).await?,
        cli::Command::Node(opts) => client::cmd_node(&addr, &opts).await?,
        cli::Command::Send(opts) => client::cmd_send(&addr, &opts.message).await?,
        cli::Command::Snapshot(opts) => cmd_snapshot::cmd_snapshot(&args.db, opts.json)?,
    }

    Ok(())
}
