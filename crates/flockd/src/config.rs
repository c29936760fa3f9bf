//! TOML configuration for the flock daemon.
//!
//! Every field is optional; omitted values fall back to the library
//! defaults in [`flock_cluster::PeerConfig`].

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use flock_cluster::{NodeNaming, PeerConfig, SeedSource};
use serde::{Deserialize, Serialize};

/// Default interval between distributor ring rebuilds.
const DEFAULT_DISTRIBUTOR_REFRESH: Duration = Duration::from_secs(10);
/// Default bound on the graceful leave broadcast at shutdown.
const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node naming and addresses.
    pub node: NodeSection,
    /// Seeds and gossip tuning.
    pub cluster: ClusterSection,
    /// Hash ring distributor.
    pub distributor: DistributorSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    /// Address the gossip socket binds to.
    pub bind_addr: String,
    /// Address advertised to other members. Defaults to `bind_addr`.
    pub advertise_addr: Option<String>,
    /// Name the node after the machine hostname instead of a generated ID.
    pub use_hostname: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            bind_addr: PeerConfig::default().bind_addr,
            advertise_addr: None,
            use_hostname: false,
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Static seed peers (`host:port`).
    pub peers: Vec<String>,
    /// A single `host:port` DNS name expanding to the seed peers.
    pub peers_dns: Option<String>,
    pub gossip_interval_ms: Option<u64>,
    pub probe_interval_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub push_pull_interval_ms: Option<u64>,
    /// Bound on a join round-trip and on startup seed resolution.
    pub tcp_timeout_ms: Option<u64>,
    /// Period of the seed refresh loop.
    pub refresh_interval_secs: Option<u64>,
    /// Bound on the graceful leave at shutdown.
    pub leave_timeout_secs: Option<u64>,
}

/// `[distributor]` section.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DistributorSection {
    /// Interval between ring rebuilds.
    pub refresh_interval_secs: Option<u64>,
    /// Virtual points per member on the ring.
    pub vnodes: Option<u16>,
}

/// `[log]` section.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Build the membership peer configuration.
    ///
    /// Fails if both static peers and a peers DNS name are configured.
    pub fn peer_config(&self) -> anyhow::Result<PeerConfig> {
        let seeds = match (&self.cluster.peers_dns, self.cluster.peers.is_empty()) {
            (Some(_), false) => bail!("set either cluster.peers or cluster.peers_dns, not both"),
            (Some(name), true) => SeedSource::Dns(name.clone()),
            (None, _) => SeedSource::Static(self.cluster.peers.clone()),
        };

        let mut config = PeerConfig::new(self.node.bind_addr.clone()).with_seeds(seeds);
        config.advertise_addr = self.node.advertise_addr.clone();
        config.naming = if self.node.use_hostname {
            NodeNaming::Hostname
        } else {
            NodeNaming::Generated
        };

        let cluster = &self.cluster;
        if let Some(ms) = cluster.gossip_interval_ms {
            config.gossip_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = cluster.probe_interval_ms {
            config.probe_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = cluster.probe_timeout_ms {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = cluster.push_pull_interval_ms {
            config.push_pull_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = cluster.tcp_timeout_ms {
            config.tcp_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = cluster.refresh_interval_secs {
            config.refresh_interval = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Effective bound on the graceful leave.
    pub fn leave_timeout(&self) -> Duration {
        self.cluster
            .leave_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LEAVE_TIMEOUT)
    }

    /// Effective distributor refresh interval.
    pub fn distributor_refresh_interval(&self) -> Duration {
        self.distributor
            .refresh_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_DISTRIBUTOR_REFRESH)
    }

    /// Effective virtual points per ring member.
    pub fn vnodes(&self) -> u16 {
        self.distributor
            .vnodes
            .unwrap_or(flock_distributor::DEFAULT_VNODES_PER_NODE)
    }
}
