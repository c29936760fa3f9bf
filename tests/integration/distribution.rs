//! Integration test: key distribution across a live cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use flock_integration_tests::{IntegrationCluster, wait_for};

/// Every node agrees on the owner of every key, and exactly one node
/// considers itself assigned.
#[tokio::test]
async fn test_nodes_agree_on_owners() {
    let c = IntegrationCluster::new(3).await;
    c.wait_for_size(3, Duration::from_secs(10)).await;
    c.settle_all().await;
    c.refresh_distributors().await;

    let members = c.node(0).distributor.member_node_list();
    assert_eq!(members.len(), 3);
    for node in c.nodes() {
        assert_eq!(node.distributor.member_node_list(), members);
    }

    let mut load: BTreeMap<String, usize> = BTreeMap::new();
    for i in 0..300 {
        let key = format!("tenant-{i}");
        let owner = c.node(0).distributor.assigned_node(&key).unwrap();
        for node in c.nodes() {
            assert_eq!(node.distributor.assigned_node(&key).unwrap(), owner);
        }

        let assigned: Vec<bool> = c
            .nodes()
            .map(|n| n.distributor.is_assigned(&key).unwrap())
            .collect();
        assert_eq!(assigned.iter().filter(|a| **a).count(), 1, "key {key}");
        *load.entry(owner).or_default() += 1;
    }
    assert_eq!(load.len(), 3, "every member should own some keys: {load:?}");

    c.shutdown().await;
}

/// The refresh loop follows membership changes and stops on leave.
#[tokio::test]
async fn test_handle_refresh_tracks_leave() {
    let c = IntegrationCluster::new(3).await;
    c.wait_for_size(3, Duration::from_secs(10)).await;
    c.settle_all().await;

    let distributor = c.node(0).distributor.clone();
    let refresh = tokio::spawn(async move {
        distributor
            .handle_refresh(Duration::from_millis(100))
            .await
    });

    wait_for(Duration::from_secs(5), Duration::from_millis(20), || {
        c.node(0).distributor.member_node_list().len() == 3
    })
    .await;

    let leaving = c.peer(2).name();
    c.peer(2).leave(Duration::from_secs(2)).await.unwrap();
    wait_for(Duration::from_secs(10), Duration::from_millis(20), || {
        !c.node(0).distributor.member_node_list().contains(&leaving)
    })
    .await;

    let text = prometheus::TextEncoder::new()
        .encode_to_string(&c.node(0).registry.gather())
        .unwrap();
    assert!(text.contains("flock_distributor_member_size 2"), "{text}");

    c.peer(0).leave(Duration::from_secs(1)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), refresh)
        .await
        .expect("refresh loop stops after leave")
        .unwrap();

    c.shutdown().await;
}
