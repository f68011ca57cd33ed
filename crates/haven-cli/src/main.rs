//! HAVEN CLI
//!
//! Home Access Via Encrypted Negotiation

mod config;
mod identity;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use haven_coordinator::{CoordinatorConfig, CoordinatorEngine};
use haven_node::{HomeNode, NodeConfig, NodeEvent};

use config::Config;

/// HAVEN - secure UDP rendezvous for private home nodes
#[derive(Parser)]
#[command(name = "haven")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the public rendezvous coordinator
    Coordinator,

    /// Run a home-node and register with the coordinator
    Node,

    /// Generate a new identity keypair
    Keygen {
        /// Output file for the key seed
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        })
        .init();

    match cli.command {
        Commands::Coordinator => run_coordinator(config).await,
        Commands::Node => run_node(config).await,
        Commands::Keygen { output } => keygen(&output),
    }
}

async fn run_coordinator(config: Config) -> anyhow::Result<()> {
    let section = &config.coordinator;
    let listen_addr: SocketAddr = section.listen_addr.parse()?;
    let identity = Arc::new(identity::load_or_generate(&section.identity_file)?);
    println!("coordinator identity: {}", identity.verifying_key());

    let engine_config = CoordinatorConfig {
        max_servers: section.max_servers,
        server_timeout: Duration::from_secs(section.server_timeout_secs),
        hello_rate_limit: section.hello_rate_per_min,
        signaling_timeout: Duration::from_secs(section.signaling_timeout_secs),
        ..Default::default()
    };

    let engine = Arc::new(CoordinatorEngine::bind(listen_addr, identity, engine_config).await?);

    let runner = Arc::clone(&engine);
    tokio::select! {
        result = runner.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            engine.shutdown().await;
        }
    }
    Ok(())
}

async fn run_node(config: Config) -> anyhow::Result<()> {
    let section = &config.node;
    let coordinator_addr: SocketAddr = section.coordinator_addr.parse()?;
    let identity = Arc::new(identity::load_or_generate(&section.identity_file)?);
    println!("node identity: {}", identity.verifying_key());

    let mut node_config = NodeConfig::new(coordinator_addr, section.passphrase.clone());
    node_config.keepalive_interval = Duration::from_secs(section.keepalive_secs);
    node_config.heartbeat_interval = Duration::from_secs(section.heartbeat_secs);
    if let Some(hex_key) = &section.coordinator_public_key {
        let bytes = hex::decode(hex_key)?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("coordinator public key must be 32 hex-encoded bytes"))?;
        node_config.coordinator_key = Some(key);
    }

    let (node, mut events) = HomeNode::new(node_config, identity);
    node.register().await?;
    println!("registered with {coordinator_addr}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(NodeEvent::Offer { session_id, payload }) => {
                    // answering is the application's job; this runner only
                    // reports what arrived
                    println!(
                        "offer for session {} ({} bytes)",
                        hex::encode(session_id),
                        payload.len()
                    );
                }
                Some(NodeEvent::Migrate { host, port, coordinator_key }) => {
                    println!(
                        "coordinator migrating to {host}:{port} (key {})",
                        hex::encode(coordinator_key)
                    );
                }
                Some(NodeEvent::Disconnected { reason }) => {
                    println!("disconnected: {reason}");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                node.shutdown().await;
                break;
            }
        }
    }
    Ok(())
}

fn keygen(output: &std::path::Path) -> anyhow::Result<()> {
    use haven_crypto::signing::SigningIdentity;
    use haven_crypto::SignatureScheme;
    use rand_core::OsRng;

    let identity = SigningIdentity::generate(SignatureScheme::Ed25519, &mut OsRng);
    identity::save(output, &identity)?;
    println!("public key: {}", identity.verifying_key());
    println!("seed written to {}", output.display());
    Ok(())
}
