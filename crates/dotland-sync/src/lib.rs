//! State synchronisation for Dotland: shared command rules, client-side
//! prediction and reconciliation, and the server's broadcast authority.

pub mod authority;
pub mod client;
pub mod command;
pub mod delta;
pub mod error;
pub mod prediction;
pub mod reconciliation;
pub mod rules;

pub use authority::{AuthorityConfig, AuthorityError, BroadcastAuthority, Verdict};
pub use client::{ClientGameState, ClientView};
pub use command::{CommandKind, DEFAULT_MAX_PENDING, PendingCommands, SequencedCommand};
pub use delta::{DeltaError, FieldPath, FieldValue, Snapshot, StateDelta, apply_fields, read_field};
pub use error::SyncError;
pub use prediction::{ClientReplica, InputOutcome, PredictionEngine, SyncPhase};
pub use reconciliation::{ReconcileReport, reconcile};
pub use rules::{InvariantViolation, apply_command};
