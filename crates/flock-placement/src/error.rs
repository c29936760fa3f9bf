//! Error types for the placement crate.

/// Errors produced by ring lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// The ring has no members, so no key has an owner.
    #[error("empty ring: no members to assign keys to")]
    RingEmpty,
}
