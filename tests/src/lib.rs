//! Shared test harness for flock integration tests.
//!
//! Provides [`IntegrationCluster`]: N real peers gossiping over UDP on
//! loopback, each with its own metrics registry and distributor.

use std::sync::Arc;
use std::time::Duration;

use flock_cluster::{Peer, PeerConfig, SeedSource};
use flock_distributor::Distributor;
use prometheus::Registry;
use tokio::time;

/// Virtual points per member used by test distributors.
pub const TEST_VNODES: u16 = 64;

/// One running node.
pub struct TestNode {
    pub peer: Arc<Peer>,
    pub distributor: Arc<Distributor>,
    pub registry: Registry,
}

impl TestNode {
    /// Create and join a node seeded with `seeds`.
    pub async fn start(seeds: Vec<String>) -> Self {
        Self::start_with(PeerConfig::test_config().with_seeds(SeedSource::Static(seeds))).await
    }

    /// Create and join a node with an explicit config.
    pub async fn start_with(config: PeerConfig) -> Self {
        let registry = Registry::new();
        let peer = Peer::create(config, &registry)
            .await
            .expect("peer should start on loopback");
        peer.join().await;
        let distributor = Arc::new(
            Distributor::new(Some(peer.clone()), &registry, TEST_VNODES)
                .expect("distributor metrics"),
        );
        Self {
            peer,
            distributor,
            registry,
        }
    }

    /// The advertised `ip:port` of this node.
    pub fn address(&self) -> String {
        self.peer.local_node().address().to_string()
    }
}

/// A cluster of real peers on 127.0.0.1.
///
/// Node 0 starts without seeds; every later node is seeded with the
/// addresses of all nodes started before it.
pub struct IntegrationCluster {
    nodes: Vec<TestNode>,
}

impl IntegrationCluster {
    pub async fn new(n: usize) -> Self {
        let mut nodes: Vec<TestNode> = Vec::with_capacity(n);
        for _ in 0..n {
            let seeds = nodes.iter().map(TestNode::address).collect();
            nodes.push(TestNode::start(seeds).await);
        }
        Self { nodes }
    }

    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    pub fn peer(&self, i: usize) -> &Arc<Peer> {
        &self.nodes[i].peer
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.iter()
    }

    /// Wait until every node sees exactly `size` members.
    pub async fn wait_for_size(&self, size: usize, timeout: Duration) {
        wait_for(timeout, Duration::from_millis(20), || {
            self.nodes.iter().all(|n| n.peer.cluster_size() == size)
        })
        .await;
    }

    /// Settle every node concurrently. Returns each node's outcome.
    pub async fn settle_all(&self) -> Vec<bool> {
        let tasks: Vec<_> = self
            .nodes
            .iter()
            .map(|n| {
                let peer = n.peer.clone();
                tokio::spawn(async move { peer.settle().await })
            })
            .collect();

        let mut settled = Vec::with_capacity(tasks.len());
        for task in tasks {
            settled.push(task.await.expect("settle task"));
        }
        settled
    }

    /// Refresh every distributor once.
    pub async fn refresh_distributors(&self) {
        for node in &self.nodes {
            node.distributor.refresh().await;
        }
    }

    /// Leave with every node, ignoring errors.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            let _ = node.peer.leave(Duration::from_secs(1)).await;
        }
    }
}

/// Poll `condition` until it returns true, panicking after `timeout`.
pub async fn wait_for<F>(timeout: Duration, poll_interval: Duration, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = time::Instant::now() + timeout;
    loop {
        if condition() {
            return;
        }
        if time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        time::sleep(poll_interval).await;
    }
}

/// Reserve a free loopback UDP address, then release it.
///
/// Another socket may grab the port in between; tests using this accept
/// that small race.
pub fn free_udp_addr() -> String {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind loopback");
    socket.local_addr().expect("local addr").to_string()
}
