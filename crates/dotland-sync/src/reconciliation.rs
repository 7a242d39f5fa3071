//! Client reconciliation: merges a canonical delta and rebuilds the
//! predicted state on top of it.
//!
//! The delta is applied to a copy of the last canonical state. Commands the
//! server has processed are discarded, and the rest are replayed in order
//! with the shared rules. A replayed command that no longer applies is
//! dropped; the predicted state keeps the canonical value instead.

use tracing::{debug, trace};

use crate::delta::{StateDelta, apply_fields};
use crate::error::SyncError;
use crate::prediction::ClientReplica;
use crate::rules::apply_command;

/// Result of merging one delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The delta was older than the current canonical state and ignored.
    pub stale: bool,
    /// Commands removed because the server acknowledged them.
    pub acknowledged: usize,
    /// Sequences of commands dropped because they failed on replay.
    pub dropped: Vec<u64>,
    /// The local player's predicted record changed beyond what the pending
    /// commands explain.
    pub corrected: bool,
}

/// Applies `delta` to `replica`. Fails without touching anything if a field
/// in the delta is invalid.
pub fn reconcile(replica: &mut ClientReplica, delta: &StateDelta) -> Result<ReconcileReport, SyncError> {
    if delta.canonical_sequence < replica.canonical_sequence {
        debug!(
            "Ignoring stale delta {} (at {})",
            delta.canonical_sequence, replica.canonical_sequence
        );
        return Ok(ReconcileReport {
            stale: true,
            ..Default::default()
        });
    }

    let mut canonical = replica.canonical.clone();
    apply_fields(&mut canonical, &delta.fields)?;

    let ack = delta.ack_sequence.max(replica.ack_sequence);
    let acknowledged = replica.pending.discard_up_to(ack);

    let player = replica.player_id;
    let mut predicted = canonical.clone();
    let mut dropped = Vec::new();
    replica.pending.retain(|command| {
        match apply_command(&mut predicted, player, &command.kind) {
            Ok(_) => true,
            Err(violation) => {
                debug!("Dropping command {} on replay: {violation}", command.sequence);
                dropped.push(command.sequence);
                false
            }
        }
    });

    let corrected = predicted.player(player) != replica.predicted.player(player);
    trace!(
        "Reconciled to {} (ack {ack}): {} fields, {acknowledged} acked, {} dropped",
        delta.canonical_sequence,
        delta.fields.len(),
        dropped.len()
    );

    replica.canonical = canonical;
    replica.canonical_sequence = delta.canonical_sequence;
    replica.ack_sequence = ack;
    replica.predicted = predicted;

    Ok(ReconcileReport {
        stale: false,
        acknowledged,
        dropped,
        corrected,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "reconciliation_tests.rs"]
mod tests;
