//! onion-gossip - flood gossip node tooling
//!
//! Runs in-memory gossip simulations and manages node configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use onion_gossip::{GossipConfig, GossipEngine, MemoryNetwork, PeerAddress, serve};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "onion-gossip")]
#[command(about = "Signed flood gossip over onion-addressed peers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flood one message through an in-memory ring of nodes
    Simulate {
        /// Number of nodes in the ring
        #[arg(short, long, default_value_t = 8)]
        nodes: usize,

        /// Topic to publish on
        #[arg(long, default_value = "chat")]
        topic: String,

        /// Message payload
        #[arg(short, long, default_value = "hello from node 0")]
        message: String,

        /// Path to a JSON config file
        #[arg(short, long, env = "ONION_GOSSIP_CONFIG")]
        config: Option<PathBuf>,

        /// Seconds to wait for the flood to settle
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },

    /// Write the default config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "onion-gossip.json")]
        output: PathBuf,
    },

    /// Print the canonical form of an onion address
    CheckAddress {
        /// Address, bare or URL-like
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("onion_gossip=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            nodes,
            topic,
            message,
            config,
            wait_secs,
        } => {
            simulate(nodes, &topic, &message, config, Duration::from_secs(wait_secs)).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }

        Commands::CheckAddress { address } => {
            check_address(&address)?;
        }
    }

    Ok(())
}

async fn simulate(
    node_count: usize,
    topic: &str,
    message: &str,
    config_path: Option<PathBuf>,
    wait: Duration,
) -> anyhow::Result<()> {
    anyhow::ensure!(node_count >= 2, "a simulation needs at least 2 nodes");

    let config = match config_path {
        Some(path) => GossipConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GossipConfig::default(),
    };

    let network = MemoryNetwork::new();
    let mut engines = Vec::with_capacity(node_count);
    let mut servers = Vec::with_capacity(node_count);

    for _ in 0..node_count {
        let (transport, inbox) = network.endpoint();
        let engine = Arc::new(GossipEngine::new(config.clone(), Arc::new(transport))?);
        engine.start().await?;
        servers.push(serve(Arc::clone(&engine), inbox));
        engines.push(engine);
    }
    info!(nodes = node_count, "all nodes running");

    let addresses: Vec<PeerAddress> = engines
        .iter()
        .filter_map(|engine| engine.local_address())
        .collect();

    for (i, engine) in engines.iter().enumerate() {
        let next = &addresses[(i + 1) % node_count];
        if let Err(e) = engine.ping_peer(next.as_str()).await {
            warn!(node = i, peer = %next, error = %e, "ring handshake failed");
        }
    }

    let envelope = engines[0].publish(topic, message)?;
    info!(id = %envelope.id(), topic = %topic, "published from node 0");

    let deadline = tokio::time::Instant::now() + wait;
    let expected = node_count - 1;
    let mut delivered = delivered_count(&engines);
    while delivered < expected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        delivered = delivered_count(&engines);
    }

    println!("Delivered to {delivered}/{expected} nodes");
    println!();
    println!("{:<4} {:<64} {:>6} {:>9} {:>10}", "NODE", "ADDRESS", "PEERS", "DELIVERED", "DUPLICATES");
    for (i, engine) in engines.iter().enumerate() {
        let stats = engine.stats();
        let address = engine
            .local_address()
            .map(|a| a.to_string())
            .unwrap_or_default();
        println!(
            "{i:<4} {address:<64} {:>6} {:>9} {:>10}",
            engine.peers().len(),
            stats.delivered,
            stats.duplicates
        );
    }

    for engine in &engines {
        engine.stop();
    }
    for server in servers {
        server.abort();
    }

    if delivered < expected {
        anyhow::bail!("message reached only {delivered} of {expected} nodes");
    }
    Ok(())
}

fn delivered_count(engines: &[Arc<GossipEngine>]) -> usize {
    engines
        .iter()
        .skip(1)
        .filter(|engine| engine.stats().delivered > 0)
        .count()
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = GossipConfig::default();
    let json = config.to_json()?;

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(output, json)?;
    println!("Config written to {}", output.display());
    Ok(())
}

fn check_address(input: &str) -> anyhow::Result<()> {
    match PeerAddress::sanitize(input) {
        Some(address) => {
            println!("{address}");
            Ok(())
        }
        None => anyhow::bail!("'{input}' is not a valid onion v3 address"),
    }
}
