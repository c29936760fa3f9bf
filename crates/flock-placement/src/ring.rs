//! Consistent hashing ring implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::PlacementError;

/// Default number of vnodes each member occupies on the ring.
pub const DEFAULT_VNODES_PER_NODE: u16 = 128;

/// Consistent hashing ring mapping keys to member names.
///
/// Each member is mapped to `vnodes_per_node` virtual nodes on a u64 ring.
/// A key is owned by the member holding the first vnode at or after the
/// key's position, walking clockwise and wrapping around.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Virtual node positions: ring position -> member name.
    vnodes: BTreeMap<u64, Arc<str>>,
    /// Member names currently on the ring.
    nodes: BTreeSet<Arc<str>>,
    /// Number of vnodes per member.
    vnodes_per_node: u16,
}

impl Ring {
    /// Create a new empty ring.
    ///
    /// A `vnodes_per_node` of zero is bumped to one so every member owns
    /// at least one point.
    pub fn new(vnodes_per_node: u16) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            nodes: BTreeSet::new(),
            vnodes_per_node: vnodes_per_node.max(1),
        }
    }

    /// Build a ring holding exactly the given members.
    pub fn from_members<I, S>(vnodes_per_node: u16, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = Self::new(vnodes_per_node);
        ring.set(members);
        ring
    }

    /// Replace the ring contents with exactly the given member set.
    ///
    /// Duplicate names are collapsed. The result depends only on the set of
    /// names, never on their order.
    pub fn set<I, S>(&mut self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.vnodes.clear();
        self.nodes.clear();
        for name in members {
            self.add_node(name.as_ref());
        }
        debug!(
            members = self.nodes.len(),
            vnodes = self.vnodes.len(),
            "ring rebuilt"
        );
    }

    /// Add a member to the ring. Adding a member twice is a no-op.
    pub fn add_node(&mut self, name: &str) {
        if self.nodes.contains(name) {
            return;
        }

        let name: Arc<str> = Arc::from(name);
        for i in 0..self.vnodes_per_node {
            let pos = vnode_position(&name, i);
            // On a position collision the smaller name wins, so the ring
            // stays independent of insertion order.
            self.vnodes
                .entry(pos)
                .and_modify(|owner| {
                    if name < *owner {
                        *owner = name.clone();
                    }
                })
                .or_insert_with(|| name.clone());
        }

        self.nodes.insert(name);
    }

    /// Remove a member from the ring.
    pub fn remove_node(&mut self, name: &str) {
        if self.nodes.remove(name) {
            for i in 0..self.vnodes_per_node {
                let pos = vnode_position(name, i);
                if self.vnodes.get(&pos).is_some_and(|owner| &**owner == name) {
                    self.vnodes.remove(&pos);
                }
            }
            debug!(name, "removed member from ring");
        }
    }

    /// Determine which member owns `key`.
    ///
    /// Walks clockwise from the key's position to the nearest vnode.
    pub fn get(&self, key: &str) -> Result<&str, PlacementError> {
        let pos = key_position(key);
        self.vnodes
            .range(pos..)
            .chain(self.vnodes.range(..pos))
            .next()
            .map(|(_, name)| &**name)
            .ok_or(PlacementError::RingEmpty)
    }

    /// Return all member names on the ring, sorted.
    pub fn members(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.to_string()).collect()
    }

    /// Return whether `name` is a member of the ring.
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Return the number of members on the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Return the total number of vnodes on the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Return whether the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Return the number of vnodes each member occupies.
    pub fn vnodes_per_node(&self) -> u16 {
        self.vnodes_per_node
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new(DEFAULT_VNODES_PER_NODE)
    }
}

/// Compute a vnode's position on the ring: blake3(name ++ vnode_index) truncated to u64.
fn vnode_position(name: &str, vnode_index: u16) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&vnode_index.to_le_bytes());
    truncate(hasher.finalize())
}

/// Compute a key's position on the ring: blake3(key) truncated to u64.
fn key_position(key: &str) -> u64 {
    truncate(blake3::hash(key.as_bytes()))
}

fn truncate(hash: blake3::Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
