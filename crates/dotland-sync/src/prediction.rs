//! Client-side prediction: local input is applied to a working copy of the
//! world immediately and queued until the server acknowledges it.
//!
//! The engine moves through `Disconnected → Syncing → Predicting`. Input is
//! only accepted while predicting; deltas are merged by
//! [`reconcile`](crate::reconciliation::reconcile).

use std::sync::Arc;

use dotland_world::{CLIENT_VERSION, ContentTables, PlayerId, WorldState, check_compatibility};
use tracing::{debug, info};

use crate::command::{CommandKind, DEFAULT_MAX_PENDING, PendingCommands, SequencedCommand};
use crate::delta::{Snapshot, StateDelta};
use crate::error::SyncError;
use crate::reconciliation::{ReconcileReport, reconcile};
use crate::rules::{InvariantViolation, apply_command};

// ---------------------------------------------------------------------------
// SyncPhase
// ---------------------------------------------------------------------------

/// Connection phase of the client engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// No session.
    Disconnected,
    /// Version accepted, waiting for the initial snapshot.
    Syncing,
    /// Snapshot applied; input is predicted locally.
    Predicting,
}

// ---------------------------------------------------------------------------
// ClientReplica
// ---------------------------------------------------------------------------

/// The two state copies a client keeps plus its unacknowledged commands.
#[derive(Debug, Clone)]
pub struct ClientReplica {
    pub(crate) player_id: PlayerId,
    pub(crate) canonical: WorldState,
    pub(crate) canonical_sequence: u64,
    pub(crate) ack_sequence: u64,
    pub(crate) predicted: WorldState,
    pub(crate) pending: PendingCommands,
}

impl ClientReplica {
    /// The local player.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Last state confirmed by the server.
    pub fn canonical(&self) -> &WorldState {
        &self.canonical
    }

    /// Server sequence of [`canonical`](Self::canonical).
    pub fn canonical_sequence(&self) -> u64 {
        self.canonical_sequence
    }

    /// Highest own command sequence the server has processed.
    pub fn ack_sequence(&self) -> u64 {
        self.ack_sequence
    }

    /// Canonical state with every pending command applied.
    pub fn predicted(&self) -> &WorldState {
        &self.predicted
    }

    /// Commands not yet acknowledged.
    pub fn pending(&self) -> &PendingCommands {
        &self.pending
    }
}

// ---------------------------------------------------------------------------
// PredictionEngine
// ---------------------------------------------------------------------------

/// What happened to a local input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// Applied locally; send this command to the server.
    Predicted(SequencedCommand),
    /// Refused by the shared rules. Nothing changed and nothing is sent.
    Rejected(InvariantViolation),
    /// Too many commands in flight. Nothing changed and nothing is sent.
    QueueFull,
}

/// Client state machine around a [`ClientReplica`].
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    phase: SyncPhase,
    next_sequence: u64,
    max_pending: usize,
    replica: Option<ClientReplica>,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl PredictionEngine {
    /// Creates a disconnected engine allowing `max_pending` commands in
    /// flight.
    pub fn new(max_pending: usize) -> Self {
        Self {
            phase: SyncPhase::Disconnected,
            next_sequence: 1,
            max_pending,
            replica: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Checks the server's API version against this build and enters
    /// `Syncing`. On failure the engine stays disconnected.
    pub fn begin_sync(&mut self, server_api_version: &str) -> Result<(), SyncError> {
        if self.phase != SyncPhase::Disconnected {
            return Err(SyncError::NotReady(self.phase));
        }
        check_compatibility(server_api_version, &CLIENT_VERSION.to_string())?;
        debug!("Server API {server_api_version} accepted, syncing");
        self.phase = SyncPhase::Syncing;
        Ok(())
    }

    /// Installs the initial snapshot as both canonical and predicted state
    /// and enters `Predicting`.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        content: Arc<ContentTables>,
    ) -> Result<(), SyncError> {
        if self.phase != SyncPhase::Syncing {
            return Err(SyncError::NotReady(self.phase));
        }
        let world =
            WorldState::from_snapshot(&snapshot.world, content).map_err(SyncError::InvalidSnapshot)?;

        info!(
            "Synced as player {} at canonical sequence {} ({} players)",
            snapshot.player_id,
            snapshot.canonical_sequence,
            world.player_count()
        );
        self.replica = Some(ClientReplica {
            player_id: snapshot.player_id,
            predicted: world.clone(),
            canonical: world,
            canonical_sequence: snapshot.canonical_sequence,
            ack_sequence: snapshot.ack_sequence,
            pending: PendingCommands::new(self.max_pending),
        });
        self.next_sequence = snapshot.ack_sequence + 1;
        self.phase = SyncPhase::Predicting;
        Ok(())
    }

    /// Validates `kind` against the predicted state and, if allowed,
    /// applies it there and queues it under the next sequence number.
    pub fn input(&mut self, kind: CommandKind, timestamp: u64) -> Result<InputOutcome, SyncError> {
        let replica = match (self.phase, self.replica.as_mut()) {
            (SyncPhase::Predicting, Some(replica)) => replica,
            _ => return Err(SyncError::NotReady(self.phase)),
        };
        if replica.pending.is_full() {
            debug!("Input dropped, {} commands in flight", replica.pending.len());
            return Ok(InputOutcome::QueueFull);
        }
        if let Err(violation) = apply_command(&mut replica.predicted, replica.player_id, &kind) {
            debug!("Input {kind:?} rejected locally: {violation}");
            return Ok(InputOutcome::Rejected(violation));
        }

        let command = SequencedCommand {
            sequence: self.next_sequence,
            timestamp,
            kind,
        };
        self.next_sequence += 1;
        replica.pending.push(command);
        Ok(InputOutcome::Predicted(command))
    }

    /// Merges a canonical delta. See [`reconcile`].
    pub fn apply_delta(&mut self, delta: &StateDelta) -> Result<ReconcileReport, SyncError> {
        match (self.phase, self.replica.as_mut()) {
            (SyncPhase::Predicting, Some(replica)) => reconcile(replica, delta),
            _ => Err(SyncError::NotReady(self.phase)),
        }
    }

    /// Drops both state copies and the pending queue.
    pub fn disconnect(&mut self) {
        if let Some(replica) = self.replica.take() {
            debug!(
                "Disconnecting player {}, dropping {} pending commands",
                replica.player_id,
                replica.pending.len()
            );
        }
        self.phase = SyncPhase::Disconnected;
        self.next_sequence = 1;
    }

    /// Both state copies, once synced.
    pub fn replica(&self) -> Option<&ClientReplica> {
        self.replica.as_ref()
    }

    /// Predicted state, once synced.
    pub fn predicted(&self) -> Option<&WorldState> {
        self.replica.as_ref().map(ClientReplica::predicted)
    }

    /// Canonical state, once synced.
    pub fn canonical(&self) -> Option<&WorldState> {
        self.replica.as_ref().map(ClientReplica::canonical)
    }
}
