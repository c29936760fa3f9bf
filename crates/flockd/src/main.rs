//! `flockd`: the flock daemon.
//!
//! Runs one cluster member: joins the gossip cluster, waits for the view to
//! settle, keeps a hash ring of the live members up to date and leaves
//! gracefully on Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! flockd start                                  # single node on 0.0.0.0:7946
//! flockd start -c flock.toml                    # with a config file
//! flockd start -b 127.0.0.1:7947 -p 127.0.0.1:7946  # second local node
//! flockd start --peers-dns flock-headless:7946  # seeds from DNS
//! flockd config                                 # print effective config
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flock_cluster::Peer;
use flock_distributor::Distributor;
use prometheus::{Registry, TextEncoder};
use tracing::{debug, info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "flockd", version, about = "flock cluster member daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "FLOCK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node and run until Ctrl-C.
    Start {
        /// Override the gossip bind address (e.g. "127.0.0.1:7947").
        #[arg(short, long)]
        bind: Option<String>,

        /// Override the advertised address.
        #[arg(short, long)]
        advertise: Option<String>,

        /// Seed peer (`host:port`). Can be specified multiple times.
        #[arg(short, long)]
        peer: Vec<String>,

        /// DNS name (`host:port`) expanding to the seed peers.
        #[arg(long, env = "FLOCK_PEERS_DNS", conflicts_with = "peer")]
        peers_dns: Option<String>,

        /// Use the machine hostname as the node name.
        #[arg(long)]
        use_hostname: bool,
    },

    /// Print the effective configuration as TOML and exit.
    Config,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Start {
            bind,
            advertise,
            peer,
            peers_dns,
            use_hostname,
        } => {
            // CLI args override config file values.
            if let Some(addr) = bind {
                config.node.bind_addr = addr;
            }
            if advertise.is_some() {
                config.node.advertise_addr = advertise;
            }
            if !peer.is_empty() {
                config.cluster.peers = peer;
                config.cluster.peers_dns = None;
            }
            if peers_dns.is_some() {
                config.cluster.peers = Vec::new();
                config.cluster.peers_dns = peers_dns;
            }
            if use_hostname {
                config.node.use_hostname = true;
            }

            setup_tracing(&config.log.level);
            cmd_start(config).await
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// flockd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    let peer_config = config.peer_config()?;
    info!(
        bind = %peer_config.bind_addr,
        advertise = ?peer_config.advertise_addr,
        seeds = ?peer_config.seeds,
        naming = ?peer_config.naming,
        "starting flockd"
    );

    let registry = Registry::new();

    // --- Membership ---
    let peer = Peer::create(peer_config, &registry)
        .await
        .context("failed to create cluster peer")?;
    peer.join().await;

    // --- Distributor ---
    let distributor = Arc::new(
        Distributor::new(Some(peer.clone()), &registry, config.vnodes())
            .context("failed to create distributor")?,
    );

    // --- Settle, then keep the ring current ---
    let background = tokio::spawn(settle_and_refresh(
        peer.clone(),
        distributor.clone(),
        config.distributor_refresh_interval(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, leaving cluster");

    if let Err(e) = peer.leave(config.leave_timeout()).await {
        warn!(%e, "graceful leave failed");
    }

    background.await.context("membership task failed")?;

    let metrics = TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")?;
    debug!(%metrics, "final metrics");
    info!("flockd stopped");

    Ok(())
}

/// Wait for the view to settle, fill the ring, then refresh it every
/// `interval` until the peer leaves.
async fn settle_and_refresh(peer: Arc<Peer>, distributor: Arc<Distributor>, interval: Duration) {
    if peer.settle().await {
        distributor.refresh().await;
        info!(
            name = %peer.name(),
            members = peer.cluster_size(),
            ring = ?distributor.member_node_list(),
            "node ready"
        );
    }
    distributor.handle_refresh(interval).await;
}
