//! Cluster member identity for the foca SWIM protocol.
//!
//! [`NodeIdentity`] carries what a node needs to be addressed and to resolve
//! identity conflicts, and implements foca's [`Identity`](foca::Identity)
//! trait. It is kept separate from [`Member`] because foca manages the
//! alive/suspect/down state internally.

use std::net::SocketAddr;

use flock_types::Member;
use serde::{Deserialize, Serialize};

/// Identity exchanged between nodes via the foca SWIM protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Unique node name.
    pub name: String,
    /// Advertised gossip address.
    pub addr: SocketAddr,
    /// Renewal counter, bumped when the node rejoins after being declared
    /// down so that the fresh identity wins over the stale one.
    pub generation: u64,
}

impl NodeIdentity {
    /// Create the identity of a running node.
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            generation: 0,
        }
    }

    /// Identity used to announce to a seed whose name is not known yet.
    ///
    /// foca routes by [`addr`](foca::Identity::addr), so a placeholder with
    /// the right address reaches the real node.
    pub fn seed(addr: SocketAddr) -> Self {
        Self {
            name: String::new(),
            addr,
            generation: 0,
        }
    }
}

impl foca::Identity for NodeIdentity {
    /// Two identities with the same `Addr` are the same physical node.
    type Addr = SocketAddr;

    /// Create a renewed identity after this node has been declared down.
    fn renew(&self) -> Option<Self> {
        Some(Self {
            generation: self.generation + 1,
            ..self.clone()
        })
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The identity with the higher generation wins.
    fn win_addr_conflict(&self, adversary: &Self) -> bool {
        self.generation > adversary.generation
    }
}

impl From<&NodeIdentity> for Member {
    fn from(id: &NodeIdentity) -> Self {
        Member::new(id.name.clone(), id.addr)
    }
}

impl From<NodeIdentity> for Member {
    fn from(id: NodeIdentity) -> Self {
        Member::new(id.name, id.addr)
    }
}
