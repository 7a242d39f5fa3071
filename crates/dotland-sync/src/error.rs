use dotland_world::{VersionError, WorldError};

use crate::delta::DeltaError;
use crate::prediction::SyncPhase;

/// Errors raised by the client-side sync engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The operation is not valid in the current phase.
    #[error("operation not allowed while {0:?}")]
    NotReady(SyncPhase),

    /// The server build cannot be talked to.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// The initial snapshot failed validation.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[source] WorldError),

    /// A delta failed validation and was discarded whole.
    #[error("invalid delta: {0}")]
    InvalidDelta(#[from] DeltaError),
}
