//! Permia Heartbeat Monitor Binary
//!
//! Runs a standalone liveness monitor. Heartbeats are read from stdin as JSON,
//! one per line, and a liveness report is printed every `report_interval`.
//! Peer records live in memory only and are lost when the process exits.

#![allow(missing_docs)]

mod config;

use clap::Parser;
use config::NodeConfig;
use permia_heartbeat::{
    DisabledAntiflood, GossipMessage, HeartbeatMonitor, JsonHeartbeatDecoder, KvHeartbeatStorage,
    MemoryKeyValueStore, MetricsRecorderSink, PeerId, StaticPeerTypeProvider, SystemClock,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Permia validator liveness monitor
///
/// Peer records are kept in memory only: uptime history does not survive a restart.
#[derive(Debug, Parser)]
#[command(name = "permia-heartbeat", version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = "PERMIA_HEARTBEAT_CONFIG")]
    config: Option<PathBuf>,

    /// Print reports to stdout as JSON instead of logging them
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    let monitor = HeartbeatMonitor::builder(config.heartbeat.clone())
        .initial_nodes(config.initial_nodes()?)
        .storage(KvHeartbeatStorage::new(MemoryKeyValueStore::new()))
        .decoder(JsonHeartbeatDecoder::new(config.limits))
        .peer_type_provider(StaticPeerTypeProvider::new(
            config.eligible_nodes()?,
            config.waiting_nodes()?,
        ))
        .antiflood(DisabledAntiflood::default())
        .clock(SystemClock::default())
        .metrics(MetricsRecorderSink::default())
        .build()?;

    info!(
        target: "permia::heartbeat",
        peers = monitor.len(),
        threshold = ?monitor.config().max_duration_peer_unresponsive,
        "Heartbeat monitor started"
    );

    let evaluation = tokio::spawn(monitor.evaluation_task());
    let topic = monitor.config().topic.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut report = tokio::time::interval(config.report_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(target: "permia::heartbeat", "Received shutdown signal");
                break;
            }
            _ = report.tick() => print_report(&monitor, cli.json)?,
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let message = GossipMessage::new(line.into_bytes(), topic.as_str(), PeerId::ZERO);
                    if let Err(err) = monitor.process_received_message(&message, &PeerId::ZERO) {
                        warn!(target: "permia::heartbeat", %err, "Heartbeat rejected");
                    }
                }
                None => {
                    info!(target: "permia::heartbeat", "Input closed");
                    break;
                }
            },
        }
    }

    evaluation.abort();
    monitor.flush().await;
    print_report(&monitor, cli.json)
}

fn print_report(monitor: &HeartbeatMonitor, json: bool) -> eyre::Result<()> {
    let snapshot = monitor.heartbeat_snapshot();
    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
        return Ok(());
    }

    for peer in &snapshot {
        info!(
            target: "permia::heartbeat",
            public_key = %peer.hex_public_key,
            active = peer.is_active,
            peer_type = %peer.peer_type,
            shard = peer.computed_shard_id,
            up_secs = peer.total_up_time,
            down_secs = peer.total_down_time,
            version = %peer.version_number,
            name = %peer.node_display_name,
            "Peer status"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn help_mentions_in_memory_storage() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("kept in memory only"));
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from(["permia-heartbeat", "--json", "-c", "node.toml"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("node.toml")));
    }
}
