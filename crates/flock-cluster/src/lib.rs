//! Gossip cluster membership for flock.
//!
//! This crate provides:
//!
//! - [`Peer`]: lifecycle of one node in the cluster (create, join, settle,
//!   refresh, leave) and read accessors over the live view.
//! - [`GossipSession`]: the membership protocol capability a peer drives,
//!   with [`SwimSession`] as the foca-over-UDP implementation.
//! - [`resolve_peers`]: seed resolution with retry for DNS names that do
//!   not have any addresses yet.
//! - [`Latch`]: the fire-once signal behind the ready gate and shutdown.

mod config;
mod error;
mod identity;
mod latch;
mod peer;
mod resolve;
mod session;
mod settle;
mod swim;


pub use config::{
    DEFAULT_DNS_RETRY_INTERVAL, DEFAULT_GOSSIP_INTERVAL, DEFAULT_PROBE_INTERVAL,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_PUSH_PULL_INTERVAL, DEFAULT_RECONNECT_INTERVAL,
    DEFAULT_RECONNECT_TIMEOUT, DEFAULT_REFRESH_INTERVAL, DEFAULT_TCP_TIMEOUT,
    MAX_GOSSIP_PACKET_SIZE, NodeNaming, PeerConfig, SeedSource, retransmit_factor,
};
pub use error::ClusterError;
pub use identity::NodeIdentity;
pub use latch::Latch;
pub use peer::{Peer, RefreshStats};
pub use resolve::{HostResolver, SystemResolver, resolve_peers, split_host_port};
pub use session::GossipSession;
pub use settle::{SETTLE_POLLS_REQUIRED, SettleTracker};
pub use swim::SwimSession;
