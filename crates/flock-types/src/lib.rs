//! Shared types for flock.
//!
//! This crate defines the value types passed between the membership peer,
//! the hash ring distributor and their callers:
//! cluster members ([`Member`]), diagnostic snapshots ([`MemberInfo`],
//! [`ClusterInfo`]), membership change notifications ([`MembershipEvent`])
//! and the readiness status of a node ([`NodeStatus`]).

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cluster members
// ---------------------------------------------------------------------------

/// A live member of the cluster as seen by the gossip session.
///
/// Member records are produced by the gossip subsystem; callers only ever
/// receive snapshots and never mutate them in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Unique node name (hostname or a generated time-ordered ID).
    pub name: String,
    /// Advertised IP address.
    pub addr: IpAddr,
    /// Advertised gossip port.
    pub port: u16,
}

impl Member {
    /// Create a member record from a name and its advertised socket address.
    pub fn new(name: impl Into<String>, address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr: address.ip(),
            port: address.port(),
        }
    }

    /// Return the dialable socket address of this member.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Build the serializable diagnostic view of this member.
    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            name: self.name.clone(),
            address: self.address().to_string(),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address())
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Diagnostic view of one member: its name and `ip:port` address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Member name.
    pub name: String,
    /// Advertised address as `ip:port`.
    pub address: String,
}

/// Point-in-time dump of a peer's membership view.
///
/// Serializes as `{"self": {...}, "peers": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// The local node.
    #[serde(rename = "self")]
    pub local: MemberInfo,
    /// Every live member, including the local node.
    pub peers: Vec<MemberInfo>,
}

// ---------------------------------------------------------------------------
// Events and status
// ---------------------------------------------------------------------------

/// Membership changes reported by the gossip session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipEvent {
    /// A member became reachable and joined the live view.
    Joined(Member),
    /// A member left gracefully or was declared down.
    Left(Member),
}

/// Readiness of a node, as reported to diagnostics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// The membership view is still converging.
    Settling,
    /// Settling finished (or was abandoned on shutdown).
    Ready,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settling => f.write_str("settling"),
            Self::Ready => f.write_str("ready"),
        }
    }
}
