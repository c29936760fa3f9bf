//! The membership peer: one process's participation in the cluster.
//!
//! A [`Peer`] wraps a [`GossipSession`] and adds the lifecycle around it:
//! seed resolution at creation and join time, a background refresh loop
//! that rejoins any seed missing from the view, the settle-then-ready gate,
//! and a shutdown signal that every loop observes.
//!
//! Join and refresh failures are never fatal. They are logged and counted,
//! and the next refresh tick retries.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flock_types::{ClusterInfo, Member, MembershipEvent, NodeStatus};
use prometheus::{IntCounter, Opts, Registry};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{NodeNaming, PeerConfig, retransmit_factor};
use crate::error::ClusterError;
use crate::latch::Latch;
use crate::resolve::{HostResolver, SystemResolver, resolve_peers, split_host_port};
use crate::session::GossipSession;
use crate::settle::{SETTLE_POLLS_REQUIRED, SettleTracker};
use crate::swim::SwimSession;

/// Outcome of one refresh tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Missing seeds that were joined.
    pub joined: usize,
    /// Missing seeds whose join failed.
    pub failed: usize,
}

/// Join counters maintained by the refresh loop.
#[derive(Clone)]
struct PeerMetrics {
    refresh_joins: IntCounter,
    refresh_join_failures: IntCounter,
}

impl PeerMetrics {
    fn register(registry: &Registry) -> Result<Self, ClusterError> {
        let refresh_joins = IntCounter::with_opts(Opts::new(
            "flock_cluster_refresh_join_total",
            "Seeds joined by the membership refresh loop.",
        ))?;
        let refresh_join_failures = IntCounter::with_opts(Opts::new(
            "flock_cluster_refresh_join_failed_total",
            "Failed seed joins in the membership refresh loop.",
        ))?;
        registry.register(Box::new(refresh_joins.clone()))?;
        registry.register(Box::new(refresh_join_failures.clone()))?;
        Ok(Self {
            refresh_joins,
            refresh_join_failures,
        })
    }
}

/// A member of the gossip cluster.
pub struct Peer {
    config: PeerConfig,
    session: Arc<dyn GossipSession>,
    resolver: Arc<dyn HostResolver>,
    ready: Latch,
    shutdown: Latch,
    metrics: PeerMetrics,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Create a peer and start its gossip session, resolving seeds via DNS.
    pub async fn create(
        config: PeerConfig,
        registry: &Registry,
    ) -> Result<Arc<Self>, ClusterError> {
        Self::create_with_resolver(config, Arc::new(SystemResolver), registry).await
    }

    /// Like [`create`](Self::create) with a custom host resolver.
    ///
    /// Malformed bind or advertise addresses and a failing socket are fatal.
    /// Seeds that do not resolve yet are not: the peer starts with an empty
    /// seed list and [`join`](Self::join) or the refresh loop picks them up.
    pub async fn create_with_resolver(
        config: PeerConfig,
        resolver: Arc<dyn HostResolver>,
        registry: &Registry,
    ) -> Result<Arc<Self>, ClusterError> {
        let bind = parse_addr("bind", &config.bind_addr)?;
        let mut advertise = match config.advertise_addr.as_deref() {
            Some(addr) => parse_addr("advertise", addr)?,
            None => bind,
        };

        let seeds = config.seeds.seeds();
        let resolved = match resolve_peers(
            &seeds,
            resolver.as_ref(),
            config.dns_retry_interval,
            tokio::time::sleep(config.tcp_timeout),
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(%e, "unable to resolve seed peers, starting without them");
                Vec::new()
            }
        };

        let name = match config.naming {
            NodeNaming::Hostname => local_hostname()?,
            NodeNaming::Generated => Uuid::now_v7().to_string(),
        };

        if advertise.ip().is_unspecified() {
            let ip = routable_ip(resolver.as_ref()).await?;
            advertise.set_ip(ip);
        }

        let gossip_fanout = retransmit_factor(resolved.len());
        debug!(seeds = resolved.len(), gossip_fanout, "resolved initial seed peers");

        let session = SwimSession::start(name, bind, advertise, &config, gossip_fanout).await?;
        Self::with_session(config, Arc::new(session), resolver, registry)
    }

    /// Wrap an already running gossip session.
    pub fn with_session(
        config: PeerConfig,
        session: Arc<dyn GossipSession>,
        resolver: Arc<dyn HostResolver>,
        registry: &Registry,
    ) -> Result<Arc<Self>, ClusterError> {
        let metrics = PeerMetrics::register(registry)?;
        let peer = Arc::new(Self {
            config,
            session,
            resolver,
            ready: Latch::new(),
            shutdown: Latch::new(),
            metrics,
            refresh_task: Mutex::new(None),
        });
        info!(name = %peer.name(), address = %peer.local_node().address(), "peer created");
        Ok(peer)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Resolve the seeds and join them, then start the refresh loop.
    ///
    /// Never fails: resolution and join errors are logged and left to the
    /// refresh loop to heal.
    pub async fn join(self: &Arc<Self>) {
        let seeds = self.config.seeds.seeds();
        let resolved = match resolve_peers(
            &seeds,
            self.resolver.as_ref(),
            self.config.dns_retry_interval,
            self.cancel_after(self.config.tcp_timeout),
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(%e, "unable to resolve seed peers");
                Vec::new()
            }
        };

        if resolved.is_empty() {
            debug!("no seed peers to join");
        } else {
            match self.session.join(&resolved).await {
                Ok(joined) => info!(joined, seeds = resolved.len(), "joined cluster"),
                Err(e) => warn!(%e, "failed to join cluster, refresh will retry"),
            }
        }

        self.start_refresh();
    }

    /// Signal shutdown and gracefully leave the cluster within `timeout`.
    ///
    /// Only the first call does anything; later calls return
    /// [`ClusterError::AlreadyLeft`].
    pub async fn leave(&self, timeout: Duration) -> Result<(), ClusterError> {
        if !self.shutdown.fire() {
            return Err(ClusterError::AlreadyLeft);
        }
        info!(name = %self.name(), ?timeout, "leaving cluster");
        self.session.leave(timeout).await
    }

    /// Block until the member count stops changing, then open the ready gate.
    ///
    /// Polls the member count every ten gossip intervals and returns `true`
    /// after [`SETTLE_POLLS_REQUIRED`] polls in a row saw the same count.
    /// Returns `false` if shutdown fires first. The ready gate opens either
    /// way.
    pub async fn settle(&self) -> bool {
        let interval = self.config.settle_poll_interval();
        let started = Instant::now();
        let mut tracker = SettleTracker::new(SETTLE_POLLS_REQUIRED);
        info!(?interval, "waiting for gossip to settle");

        let settled = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!(
                        polls = tracker.polls(),
                        elapsed = ?started.elapsed(),
                        "gossip not settled but shutting down"
                    );
                    break false;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let members = self.session.num_members();
            if tracker.observe(members) {
                info!(
                    polls = tracker.polls(),
                    members,
                    elapsed = ?started.elapsed(),
                    "gossip settled, proceeding"
                );
                break true;
            }
            debug!(
                polls = tracker.polls(),
                members,
                run = tracker.run(),
                "gossip not settled"
            );
        };

        self.ready.fire();
        settled
    }

    /// Run one refresh tick: rejoin every resolved seed missing from the view.
    ///
    /// Resolution is cancelled after one refresh interval or on shutdown.
    pub async fn refresh(&self) -> RefreshStats {
        let seeds = self.config.seeds.seeds();
        let resolved = match resolve_peers(
            &seeds,
            self.resolver.as_ref(),
            self.config.dns_retry_interval,
            self.cancel_after(self.config.refresh_interval),
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!(%e, "refresh: unable to resolve seed peers");
                return RefreshStats::default();
            }
        };

        let known: HashSet<String> = self
            .session
            .members()
            .iter()
            .map(|m| m.address().to_string())
            .collect();

        let mut stats = RefreshStats::default();
        for addr in resolved.iter().filter(|a| !known.contains(*a)) {
            match self.session.join(std::slice::from_ref(addr)).await {
                Ok(_) => {
                    stats.joined += 1;
                    self.metrics.refresh_joins.inc();
                    debug!(%addr, "refresh: joined peer");
                }
                Err(e) => {
                    stats.failed += 1;
                    self.metrics.refresh_join_failures.inc();
                    warn!(%addr, %e, "refresh: failed to join peer");
                }
            }
        }
        stats
    }

    /// Spawn the refresh loop unless it is already running.
    fn start_refresh(self: &Arc<Self>) {
        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }

        let peer = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.refresh_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {}
                }
                let Some(peer) = peer.upgrade() else { break };
                let stats = peer.refresh().await;
                if stats != RefreshStats::default() {
                    debug!(joined = stats.joined, failed = stats.failed, "refresh tick");
                }
            }
            debug!("refresh loop stopped");
        }));
    }

    /// A future that completes after `limit` or on shutdown, whichever is first.
    fn cancel_after(&self, limit: Duration) -> impl Future<Output = ()> + Send + 'static {
        let shutdown = self.shutdown.clone();
        async move {
            tokio::select! {
                _ = shutdown.wait() => {}
                _ = tokio::time::sleep(limit) => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The local node name, stable for the process lifetime.
    pub fn name(&self) -> String {
        self.session.local_node().name
    }

    /// Number of live members, this node included.
    pub fn cluster_size(&self) -> usize {
        self.session.num_members()
    }

    /// Snapshot of every live member, this node included.
    pub fn peers(&self) -> Vec<Member> {
        self.session.members()
    }

    /// This node's member record.
    pub fn local_node(&self) -> Member {
        self.session.local_node()
    }

    /// Non-blocking check of the ready gate.
    pub fn ready(&self) -> bool {
        self.ready.is_fired()
    }

    /// Wait until the ready gate opens.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    /// Readiness for diagnostics: settling until the ready gate opens.
    pub fn status(&self) -> NodeStatus {
        if self.ready() {
            NodeStatus::Ready
        } else {
            NodeStatus::Settling
        }
    }

    /// Serializable snapshot of the membership view for diagnostics.
    pub fn info(&self) -> ClusterInfo {
        ClusterInfo {
            local: self.local_node().info(),
            peers: self.peers().iter().map(Member::info).collect(),
        }
    }

    /// Subscribe to membership changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.session.subscribe()
    }

    /// Check whether [`leave`](Self::leave) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_fired()
    }

    /// Wait until [`leave`](Self::leave) has been called.
    pub async fn stopped(&self) {
        self.shutdown.wait().await;
    }

    /// Seeds joined by the refresh loop so far.
    pub fn refresh_joins(&self) -> u64 {
        self.metrics.refresh_joins.get()
    }

    /// Failed refresh joins so far.
    pub fn refresh_failures(&self) -> u64 {
        self.metrics.refresh_join_failures.get()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        let slot = self
            .refresh_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.name())
            .field("cluster_size", &self.cluster_size())
            .field("ready", &self.ready())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Parse a bind or advertise `ip:port`. An empty host means all interfaces.
fn parse_addr(which: &'static str, addr: &str) -> Result<SocketAddr, ClusterError> {
    let invalid = |reason: String| ClusterError::AddressParse {
        which,
        addr: addr.to_string(),
        reason,
    };

    let (host, port) = split_host_port(addr).map_err(invalid)?;
    let ip = if host.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        host.parse::<IpAddr>()
            .map_err(|e| invalid(format!("invalid ip {host:?}: {e}")))?
    };
    Ok(SocketAddr::new(ip, port))
}

fn local_hostname() -> Result<String, ClusterError> {
    hostname::get()
        .map_err(|e| ClusterError::SessionCreate(format!("hostname: {e}")))?
        .into_string()
        .map_err(|raw| ClusterError::SessionCreate(format!("hostname is not utf-8: {raw:?}")))
}

/// Pick an address other members can reach when advertising a wildcard bind.
async fn routable_ip(resolver: &dyn HostResolver) -> Result<IpAddr, ClusterError> {
    let host = local_hostname()?;
    let not_found = |reason: String| ClusterError::AddressParse {
        which: "advertise",
        addr: host.clone(),
        reason,
    };

    let ips = resolver
        .lookup_ip(&host)
        .await
        .map_err(|e| not_found(format!("cannot resolve hostname: {e}")))?;
    ips.into_iter()
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .ok_or_else(|| not_found("no routable address for hostname".to_string()))
}
