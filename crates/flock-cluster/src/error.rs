//! Error types for the cluster crate.

/// Errors produced by seed resolution and the membership peer.
///
/// Only configuration-shape errors and session creation errors are fatal.
/// Resolution and join failures are healed by the refresh loop and are
/// logged and counted rather than propagated out of `Peer::join`.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A seed address could not be split into host and port.
    #[error("invalid seed address {addr}: {reason}")]
    AddressFormat {
        /// The offending seed string.
        addr: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A bind or advertise address is malformed.
    #[error("invalid {which} address {addr}: {reason}")]
    AddressParse {
        /// `"bind"` or `"advertise"`.
        which: &'static str,
        /// The offending address string.
        addr: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The gossip session could not be started.
    #[error("failed to create gossip session: {0}")]
    SessionCreate(String),

    /// DNS lookups for a seed kept failing or returning nothing.
    #[error("dns resolution failed for {host}: {reason}")]
    DnsResolution {
        /// The host that was being resolved.
        host: String,
        /// The last lookup error.
        reason: String,
    },

    /// No seed could be contacted.
    #[error("failed to join cluster: {0}")]
    Join(String),

    /// The graceful leave broadcast did not finish in time.
    #[error("leave did not complete within {0:?}")]
    LeaveTimeout(std::time::Duration),

    /// `leave` was called on a peer that already left.
    #[error("peer has already left the cluster")]
    AlreadyLeft,

    /// The background gossip task is no longer running.
    #[error("gossip session stopped")]
    SessionStopped,

    /// Metric registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
