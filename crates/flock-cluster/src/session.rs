//! The gossip membership capability consumed by [`Peer`](crate::Peer).
//!
//! Any SWIM-style, failure-detecting membership protocol can back a peer as
//! long as it can join seeds, leave gracefully, and report the live view.
//! [`SwimSession`](crate::SwimSession) is the production implementation;
//! tests substitute scripted sessions.

use std::time::Duration;

use flock_types::{Member, MembershipEvent};
use tokio::sync::broadcast;

use crate::error::ClusterError;

/// A running membership protocol session.
#[async_trait::async_trait]
pub trait GossipSession: Send + Sync {
    /// Contact the given `ip:port` addresses and join their cluster.
    ///
    /// Returns how many of them were reached. Fails only if none were.
    async fn join(&self, addrs: &[String]) -> Result<usize, ClusterError>;

    /// Broadcast a graceful leave, waiting at most `timeout`.
    async fn leave(&self, timeout: Duration) -> Result<(), ClusterError>;

    /// Snapshot of every live member, the local node included.
    fn members(&self) -> Vec<Member>;

    /// The local node's member record.
    fn local_node(&self) -> Member;

    /// Number of live members, the local node included.
    fn num_members(&self) -> usize {
        self.members().len()
    }

    /// Subscribe to member join/leave notifications.
    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;
}
