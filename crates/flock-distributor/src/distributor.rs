//! Hash ring distributor over the live member list.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use flock_cluster::Peer;
use flock_placement::Ring;
use prometheus::{IntGauge, Opts, Registry};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::DistributorError;

/// Maps keys to the cluster member that owns them.
///
/// Queries read an immutable ring snapshot. [`refresh`](Self::refresh)
/// builds a new ring from the peer's current member list and swaps it in,
/// so a query never sees a half-built ring.
pub struct Distributor {
    peer: Option<Arc<Peer>>,
    ring: RwLock<Arc<Ring>>,
    vnodes_per_node: u16,
    member_gauge: IntGauge,
}

impl Distributor {
    /// Create a distributor with an empty ring.
    ///
    /// Registers the `flock_distributor_member_size` gauge on `registry`.
    pub fn new(
        peer: Option<Arc<Peer>>,
        registry: &Registry,
        vnodes_per_node: u16,
    ) -> Result<Self, DistributorError> {
        let member_gauge = IntGauge::with_opts(Opts::new(
            "flock_distributor_member_size",
            "Number of members on the distributor's hash ring.",
        ))?;
        registry.register(Box::new(member_gauge.clone()))?;

        Ok(Self {
            peer,
            ring: RwLock::new(Arc::new(Ring::new(vnodes_per_node))),
            vnodes_per_node,
            member_gauge,
        })
    }

    /// Rebuild the ring from exactly the peer's current member names.
    ///
    /// Waits for the peer to be ready first so that an unsettled, possibly
    /// empty view is never used. Returns the new member count. Without a
    /// peer this does nothing.
    pub async fn refresh(&self) -> usize {
        let Some(peer) = &self.peer else {
            debug!("no peer attached, skipping ring refresh");
            return 0;
        };
        peer.wait_ready().await;

        let names: Vec<String> = peer.peers().into_iter().map(|m| m.name).collect();
        let ring = Arc::new(Ring::from_members(self.vnodes_per_node, &names));
        let size = ring.node_count();

        let previous = std::mem::replace(
            &mut *self.ring.write().unwrap_or_else(PoisonError::into_inner),
            ring,
        );
        self.member_gauge.set(size as i64);

        if previous.node_count() != size {
            info!(members = size, previous = previous.node_count(), "hash ring rebuilt");
        } else {
            debug!(members = size, "hash ring rebuilt");
        }
        size
    }

    /// Check whether the local node owns `key`.
    pub fn is_assigned(&self, key: &str) -> Result<bool, DistributorError> {
        let peer = self.peer.as_ref().ok_or(DistributorError::NoPeer)?;
        let ring = self.snapshot();
        let owner = ring.get(key)?;
        Ok(owner == peer.name())
    }

    /// Return the name of the member that owns `key`.
    pub fn assigned_node(&self, key: &str) -> Result<String, DistributorError> {
        if self.peer.is_none() {
            return Err(DistributorError::NoPeer);
        }
        let ring = self.snapshot();
        Ok(ring.get(key)?.to_string())
    }

    /// Names on the current ring, sorted.
    pub fn member_node_list(&self) -> Vec<String> {
        self.snapshot().members()
    }

    /// Refresh the ring every `interval` until the peer leaves the cluster.
    pub async fn handle_refresh(&self, interval: Duration) {
        let Some(peer) = &self.peer else {
            warn!("no peer attached, ring refresh loop not started");
            return;
        };

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = peer.stopped() => break,
                _ = ticker.tick() => {}
            }
            // Refresh blocks on readiness, which settle opens even on
            // shutdown, so this cannot wedge the loop.
            self.refresh().await;
        }
        debug!("ring refresh loop stopped");
    }

    fn snapshot(&self) -> Arc<Ring> {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("members", &self.snapshot().node_count())
            .field("vnodes_per_node", &self.vnodes_per_node)
            .field("has_peer", &self.peer.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::{IpAddr, SocketAddr};
    use std::sync::Mutex;

    use flock_cluster::{ClusterError, GossipSession, HostResolver, PeerConfig};
    use flock_placement::{DEFAULT_VNODES_PER_NODE, PlacementError};
    use flock_types::{Member, MembershipEvent};
    use tokio::sync::broadcast;

    use super::*;

    /// Gossip session with a fixed local node and a mutable view.
    struct StaticSession {
        local: Member,
        members: Mutex<Vec<Member>>,
        events: broadcast::Sender<MembershipEvent>,
    }

    impl StaticSession {
        fn new(local: &str, others: &[&str]) -> Self {
            let (events, _) = broadcast::channel(4);
            let local = member(local, 0);
            let mut members = vec![local.clone()];
            members.extend(others.iter().enumerate().map(|(i, n)| member(n, i as u8 + 1)));
            Self {
                local,
                members: Mutex::new(members),
                events,
            }
        }

        fn set_members(&self, names: &[&str]) {
            *self.members.lock().unwrap() = names
                .iter()
                .enumerate()
                .map(|(i, n)| member(n, i as u8))
                .collect();
        }
    }

    #[async_trait::async_trait]
    impl GossipSession for StaticSession {
        async fn join(&self, _addrs: &[String]) -> Result<usize, ClusterError> {
            Ok(0)
        }

        async fn leave(&self, _timeout: Duration) -> Result<(), ClusterError> {
            Ok(())
        }

        fn members(&self) -> Vec<Member> {
            self.members.lock().unwrap().clone()
        }

        fn local_node(&self) -> Member {
            self.local.clone()
        }

        fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
            self.events.subscribe()
        }
    }

    struct NoDns;

    #[async_trait::async_trait]
    impl HostResolver for NoDns {
        async fn lookup_ip(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            Err(io::Error::other(format!("no dns for {host}")))
        }
    }

    fn member(name: &str, n: u8) -> Member {
        Member::new(name, SocketAddr::from(([10, 0, 0, n], 7946)))
    }

    fn peer_with(session: Arc<StaticSession>) -> Arc<Peer> {
        Peer::with_session(
            PeerConfig::test_config(),
            session,
            Arc::new(NoDns),
            &Registry::new(),
        )
        .unwrap()
    }

    async fn ready_distributor(
        local: &str,
        others: &[&str],
    ) -> (Distributor, Arc<StaticSession>) {
        let session = Arc::new(StaticSession::new(local, others));
        let peer = peer_with(session.clone());
        assert!(peer.settle().await);

        let distributor =
            Distributor::new(Some(peer), &Registry::new(), DEFAULT_VNODES_PER_NODE).unwrap();
        distributor.refresh().await;
        (distributor, session)
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_owned_by_other_node() {
        let (distributor, _) = ready_distributor("node-a", &["node-b", "node-c"]).await;
        assert_eq!(distributor.member_node_list(), vec!["node-a", "node-b", "node-c"]);

        let ring = Ring::from_members(DEFAULT_VNODES_PER_NODE, ["node-a", "node-b", "node-c"]);
        let key = (0..10_000)
            .map(|i| format!("tenant-{i}"))
            .find(|k| ring.get(k).unwrap() == "node-b")
            .expect("some key must land on node-b");

        assert!(!distributor.is_assigned(&key).unwrap());
        assert_eq!(distributor.assigned_node(&key).unwrap(), "node-b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_assignment_is_deterministic() {
        let (distributor, _) = ready_distributor("node-a", &["node-b", "node-c"]).await;

        let mut owned = 0;
        for i in 0..300 {
            let key = format!("tenant-{i}");
            let first = distributor.is_assigned(&key).unwrap();
            for _ in 0..3 {
                assert_eq!(distributor.is_assigned(&key).unwrap(), first);
            }
            assert_eq!(
                first,
                distributor.assigned_node(&key).unwrap() == "node-a"
            );
            owned += usize::from(first);
        }
        // Roughly a third each.
        assert!((50..=150).contains(&owned), "node-a owns {owned} of 300");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_tracks_exact_member_set() {
        let registry = Registry::new();
        let session = Arc::new(StaticSession::new("node-a", &["node-b", "node-c"]));
        let peer = peer_with(session.clone());
        peer.settle().await;
        let distributor = Distributor::new(Some(peer), &registry, 16).unwrap();

        assert_eq!(distributor.refresh().await, 3);
        session.set_members(&["node-a", "node-d"]);
        assert_eq!(distributor.refresh().await, 2);
        assert_eq!(distributor.member_node_list(), vec!["node-a", "node-d"]);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("flock_distributor_member_size 2"), "{text}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_ready() {
        let session = Arc::new(StaticSession::new("node-a", &["node-b"]));
        let peer = peer_with(session);
        let distributor = Arc::new(
            Distributor::new(Some(peer.clone()), &Registry::new(), 16).unwrap(),
        );

        let refreshing = {
            let distributor = distributor.clone();
            tokio::spawn(async move { distributor.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!refreshing.is_finished());
        assert!(distributor.member_node_list().is_empty());

        peer.settle().await;
        assert_eq!(refreshing.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_ring_is_an_error() {
        let session = Arc::new(StaticSession::new("node-a", &[]));
        let distributor =
            Distributor::new(Some(peer_with(session)), &Registry::new(), 16).unwrap();

        let err = distributor.assigned_node("tenant-1").unwrap_err();
        assert!(matches!(err, DistributorError::Ring(PlacementError::RingEmpty)));
        let err = distributor.is_assigned("tenant-1").unwrap_err();
        assert!(matches!(err, DistributorError::Ring(PlacementError::RingEmpty)));
    }

    #[tokio::test]
    async fn test_no_peer() {
        let distributor = Distributor::new(None, &Registry::new(), 16).unwrap();

        assert!(matches!(
            distributor.is_assigned("tenant-1"),
            Err(DistributorError::NoPeer)
        ));
        assert!(matches!(
            distributor.assigned_node("tenant-1"),
            Err(DistributorError::NoPeer)
        ));
        assert_eq!(distributor.refresh().await, 0);
        distributor.handle_refresh(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_refresh_follows_view_until_leave() {
        let session = Arc::new(StaticSession::new("node-a", &["node-b"]));
        let peer = peer_with(session.clone());
        peer.settle().await;
        let distributor =
            Arc::new(Distributor::new(Some(peer.clone()), &Registry::new(), 16).unwrap());

        let interval = Duration::from_secs(1);
        let task = {
            let distributor = distributor.clone();
            tokio::spawn(async move { distributor.handle_refresh(interval).await })
        };

        tokio::time::sleep(interval + interval / 2).await;
        assert_eq!(distributor.member_node_list(), vec!["node-a", "node-b"]);

        session.set_members(&["node-a", "node-b", "node-c"]);
        tokio::time::sleep(interval).await;
        assert_eq!(distributor.member_node_list().len(), 3);

        peer.leave(Duration::from_secs(1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("refresh loop must stop after leave")
            .unwrap();
    }

    #[test]
    fn test_gauge_registered_once() {
        let registry = Registry::new();
        Distributor::new(None, &registry, 16).unwrap();
        assert!(matches!(
            Distributor::new(None, &registry, 16),
            Err(DistributorError::Metrics(_))
        ));
    }
}
