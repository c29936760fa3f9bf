//! Key ownership over the live cluster membership.
//!
//! A [`Distributor`] rebuilds a consistent hash ring from its
//! [`Peer`](flock_cluster::Peer)'s member list and answers which member owns
//! a key. Ownership is an eventually consistent hint: the ring is replaced
//! wholesale on every refresh and may lag the live view in between.

mod distributor;
mod error;

pub use distributor::Distributor;
pub use error::DistributorError;
pub use flock_placement::DEFAULT_VNODES_PER_NODE;
