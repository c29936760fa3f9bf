//! Consistent hashing ring for deterministic key ownership.
//!
//! This crate implements a consistent hash ring that maps arbitrary string
//! keys (tenant IDs, rule group names, ...) to exactly one member name.
//!
//! The ring uses virtual nodes (vnodes): each member gets multiple
//! positions on the ring, determined by `blake3(name ++ vnode_index)`.
//! More vnodes per member = more uniform distribution, at the cost of a
//! slower rebuild.

mod error;
mod ring;

pub use error::PlacementError;
pub use ring::{DEFAULT_VNODES_PER_NODE, Ring};
