//! Integration test: cluster formation over real UDP gossip.

use std::collections::BTreeSet;
use std::time::Duration;

use flock_cluster::{PeerConfig, SeedSource};
use flock_integration_tests::{IntegrationCluster, TestNode, free_udp_addr, wait_for};
use flock_types::NodeStatus;

/// Three peers seeded with each other converge on a view of three and settle.
#[tokio::test]
async fn test_3_node_cluster_converges_and_settles() {
    let c = IntegrationCluster::new(3).await;
    c.wait_for_size(3, Duration::from_secs(10)).await;

    // Everyone sees the same member names.
    let names: Vec<BTreeSet<String>> = c
        .nodes()
        .map(|n| n.peer.peers().into_iter().map(|m| m.name).collect())
        .collect();
    assert!(names.windows(2).all(|w| w[0] == w[1]), "views differ: {names:?}");
    assert!(names[0].contains(&c.peer(0).name()));

    // A quiet three-node view settles in a bounded number of polls.
    let poll = PeerConfig::test_config().settle_poll_interval();
    let settled = tokio::time::timeout(poll * 20, c.settle_all())
        .await
        .expect("settle should finish once the view is quiet");
    assert_eq!(settled, vec![true; 3]);
    assert!(c.nodes().all(|n| n.peer.ready()));
    assert!(c.nodes().all(|n| n.peer.status() == NodeStatus::Ready));

    c.shutdown().await;
}

/// A five-node chain still converges to a full view.
#[tokio::test]
async fn test_5_node_cluster_converges() {
    let c = IntegrationCluster::new(5).await;
    c.wait_for_size(5, Duration::from_secs(15)).await;
    c.shutdown().await;
}

/// Node names are unique generated IDs.
#[tokio::test]
async fn test_generated_names_are_unique() {
    let c = IntegrationCluster::new(3).await;
    let names: BTreeSet<String> = c.nodes().map(|n| n.peer.name()).collect();
    assert_eq!(names.len(), 3);
    c.shutdown().await;
}

/// A seed that was down at join time is picked up by the refresh loop.
#[tokio::test]
async fn test_refresh_loop_heals_missed_join() {
    let late_addr = free_udp_addr();

    // Joining a dead seed fails quietly.
    let mut config = PeerConfig::test_config()
        .with_seeds(SeedSource::Static(vec![late_addr.clone()]));
    config.tcp_timeout = Duration::from_millis(300);
    let early = TestNode::start_with(config).await;
    assert_eq!(early.peer.cluster_size(), 1);

    // The seed comes up afterwards, knowing nobody.
    let mut late_config = PeerConfig::test_config();
    late_config.bind_addr = late_addr;
    let late = TestNode::start_with(late_config).await;

    wait_for(Duration::from_secs(10), Duration::from_millis(20), || {
        early.peer.cluster_size() == 2 && late.peer.cluster_size() == 2
    })
    .await;
    assert!(early.peer.refresh_joins() >= 1);

    let _ = early.peer.leave(Duration::from_secs(1)).await;
    let _ = late.peer.leave(Duration::from_secs(1)).await;
}
