//! Integration test: leave, shutdown and diagnostics.

use std::time::Duration;

use flock_cluster::ClusterError;
use flock_integration_tests::{IntegrationCluster, TestNode, wait_for};
use flock_types::MembershipEvent;

/// A graceful leave removes the node from the others' views.
#[tokio::test]
async fn test_leave_shrinks_cluster() {
    let c = IntegrationCluster::new(3).await;
    c.wait_for_size(3, Duration::from_secs(10)).await;

    c.peer(2).leave(Duration::from_secs(2)).await.unwrap();
    wait_for(Duration::from_secs(10), Duration::from_millis(20), || {
        c.peer(0).cluster_size() == 2 && c.peer(1).cluster_size() == 2
    })
    .await;

    c.shutdown().await;
}

/// Leaving twice is a well-defined error.
#[tokio::test]
async fn test_leave_twice() {
    let node = TestNode::start(Vec::new()).await;

    node.peer.leave(Duration::from_secs(1)).await.unwrap();
    let err = node.peer.leave(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, ClusterError::AlreadyLeft));
}

/// Settle never hangs once shutdown has begun.
#[tokio::test]
async fn test_settle_returns_after_leave() {
    let node = TestNode::start(Vec::new()).await;
    node.peer.leave(Duration::from_secs(1)).await.unwrap();

    let settled = tokio::time::timeout(Duration::from_secs(1), node.peer.settle())
        .await
        .expect("settle must not hang after shutdown");
    assert!(!settled);
    assert!(node.peer.ready());
}

/// Members joining and leaving are reported to subscribers.
#[tokio::test]
async fn test_membership_events() {
    let first = TestNode::start(Vec::new()).await;
    let mut events = first.peer.subscribe();

    let second = TestNode::start(vec![first.address()]).await;
    let second_name = second.peer.name();

    let joined = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("join event")
        .unwrap();
    assert!(matches!(joined, MembershipEvent::Joined(ref m) if m.name == second_name));

    second.peer.leave(Duration::from_secs(2)).await.unwrap();
    let left = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("leave event")
        .unwrap();
    assert!(matches!(left, MembershipEvent::Left(ref m) if m.name == second_name));

    let _ = first.peer.leave(Duration::from_secs(1)).await;
}

/// The diagnostic snapshot lists self and every peer.
#[tokio::test]
async fn test_info_snapshot() {
    let c = IntegrationCluster::new(2).await;
    c.wait_for_size(2, Duration::from_secs(10)).await;

    let json = serde_json::to_value(c.peer(0).info()).unwrap();
    assert_eq!(json["self"]["name"], c.peer(0).name());
    assert_eq!(json["self"]["address"], c.node(0).address());
    assert_eq!(json["peers"].as_array().unwrap().len(), 2);

    c.shutdown().await;
}
