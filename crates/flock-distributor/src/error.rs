//! Error types for the distributor crate.

use flock_placement::PlacementError;

/// Errors returned by [`Distributor`](crate::Distributor) queries.
#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    /// The distributor has no membership peer attached.
    #[error("no peer attached to distributor")]
    NoPeer,

    /// The ring could not answer, e.g. because it has no members yet.
    #[error(transparent)]
    Ring(#[from] PlacementError),

    /// Metric registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
