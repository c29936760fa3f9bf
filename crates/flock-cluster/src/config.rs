//! Configuration for the membership [`Peer`](crate::Peer).

use std::time::Duration;

/// Default interval between full-state announcements to a random member.
pub const DEFAULT_PUSH_PULL_INTERVAL: Duration = Duration::from_secs(60);
/// Default interval between gossip rounds.
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_millis(200);
/// Default bound on a single join or request round-trip.
pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default time to wait for a probe acknowledgement.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
/// Default interval between failure-detection probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
/// Default interval between announcements to members declared down.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
/// Default time after which a down member is forgotten.
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
/// Default period of the seed refresh loop.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
/// Default retry interval for DNS lookups that return no addresses.
pub const DEFAULT_DNS_RETRY_INTERVAL: Duration = Duration::from_secs(2);
/// Maximum size of a single gossip datagram.
pub const MAX_GOSSIP_PACKET_SIZE: usize = 1400;

/// Where the seed peers come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    /// A fixed list of `host:port` seeds.
    Static(Vec<String>),
    /// A single `host:port` DNS name that may resolve to many addresses
    /// (e.g. a headless service in front of the peer set).
    Dns(String),
}

impl SeedSource {
    /// Return the configured seed strings, unresolved.
    pub fn seeds(&self) -> Vec<String> {
        match self {
            Self::Static(peers) => peers.clone(),
            Self::Dns(name) => vec![name.clone()],
        }
    }
}

impl Default for SeedSource {
    fn default() -> Self {
        Self::Static(Vec::new())
    }
}

/// How the local node picks its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeNaming {
    /// Use the machine hostname.
    Hostname,
    /// Generate a random, time-ordered unique ID once at creation.
    #[default]
    Generated,
}

/// Configuration for a membership [`Peer`](crate::Peer).
///
/// Immutable once the peer has been created.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Local `host:port` to bind the gossip socket to.
    pub bind_addr: String,
    /// `host:port` advertised to other members. Defaults to `bind_addr`;
    /// port `0` means "the port actually bound".
    pub advertise_addr: Option<String>,
    /// Interval between gossip rounds. Settling polls at ten times this.
    pub gossip_interval: Duration,
    /// Interval between failure-detection probes.
    pub probe_interval: Duration,
    /// Time to wait for a probe acknowledgement.
    pub probe_timeout: Duration,
    /// Interval between full-state announcements.
    pub push_pull_interval: Duration,
    /// Bound on a single join round-trip and on create-time seed resolution.
    pub tcp_timeout: Duration,
    /// Interval between announcements to members declared down.
    pub reconnect_interval: Duration,
    /// Time after which a down member is forgotten.
    pub reconnect_timeout: Duration,
    /// Period of the background seed refresh loop.
    pub refresh_interval: Duration,
    /// Retry interval for DNS lookups that return no addresses.
    pub dns_retry_interval: Duration,
    /// Seed peers used to discover the cluster.
    pub seeds: SeedSource,
    /// How the local node name is chosen.
    pub naming: NodeNaming,
}

impl PeerConfig {
    /// Create a config with production defaults bound to `bind_addr`.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    /// Create a config suitable for fast test execution on loopback.
    pub fn test_config() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            advertise_addr: None,
            gossip_interval: Duration::from_millis(20),
            probe_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(50),
            push_pull_interval: Duration::from_millis(500),
            tcp_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(500),
            reconnect_timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_millis(200),
            dns_retry_interval: Duration::from_millis(50),
            seeds: SeedSource::default(),
            naming: NodeNaming::Generated,
        }
    }

    /// Set the seed peers.
    pub fn with_seeds(mut self, seeds: SeedSource) -> Self {
        self.seeds = seeds;
        self
    }

    /// Return the interval at which settling samples the member count.
    pub fn settle_poll_interval(&self) -> Duration {
        self.gossip_interval * 10
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7946".to_string(),
            advertise_addr: None,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            push_pull_interval: DEFAULT_PUSH_PULL_INTERVAL,
            tcp_timeout: DEFAULT_TCP_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            dns_retry_interval: DEFAULT_DNS_RETRY_INTERVAL,
            seeds: SeedSource::default(),
            naming: NodeNaming::Generated,
        }
    }
}

/// Retransmission factor for gossip updates: half the seed count, at least 3.
pub fn retransmit_factor(seed_count: usize) -> usize {
    (seed_count / 2).max(3)
}
