//! Client game-state aggregate: the prediction engine plus the camera,
//! and the read-only view handed to rendering.

use std::sync::Arc;

use dotland_world::{Camera, ContentTables, PlayerId, WorldState};

use crate::command::CommandKind;
use crate::delta::{Snapshot, StateDelta};
use crate::error::SyncError;
use crate::prediction::{InputOutcome, PredictionEngine, SyncPhase};
use crate::reconciliation::ReconcileReport;

/// What rendering needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    /// The local player.
    pub player_id: PlayerId,
    /// Last canonical sequence merged.
    pub canonical_sequence: u64,
    /// Commands still waiting for an ack.
    pub pending: usize,
    /// Predicted world.
    pub world: WorldState,
    /// Camera, following the local player.
    pub camera: Camera,
}

/// Everything the client mutates, kept behind one lock so input and delta
/// merges never interleave.
#[derive(Debug, Clone, Default)]
pub struct ClientGameState {
    engine: PredictionEngine,
    camera: Camera,
}

impl ClientGameState {
    /// Creates a disconnected state.
    pub fn new(max_pending: usize) -> Self {
        Self {
            engine: PredictionEngine::new(max_pending),
            camera: Camera::default(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.engine.phase()
    }

    /// The underlying engine.
    pub fn engine(&self) -> &PredictionEngine {
        &self.engine
    }

    /// The camera.
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Sets the camera zoom. Returns `false` for non-positive values.
    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        self.camera.set_zoom(zoom)
    }

    /// See [`PredictionEngine::begin_sync`].
    pub fn begin_sync(&mut self, server_api_version: &str) -> Result<(), SyncError> {
        self.engine.begin_sync(server_api_version)
    }

    /// See [`PredictionEngine::apply_snapshot`].
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        content: Arc<ContentTables>,
    ) -> Result<(), SyncError> {
        self.engine.apply_snapshot(snapshot, content)?;
        self.follow_player();
        Ok(())
    }

    /// See [`PredictionEngine::input`].
    pub fn input(&mut self, kind: CommandKind, timestamp: u64) -> Result<InputOutcome, SyncError> {
        let outcome = self.engine.input(kind, timestamp)?;
        if matches!(outcome, InputOutcome::Predicted(_)) {
            self.follow_player();
        }
        Ok(outcome)
    }

    /// See [`PredictionEngine::apply_delta`].
    pub fn apply_delta(&mut self, delta: &StateDelta) -> Result<ReconcileReport, SyncError> {
        let report = self.engine.apply_delta(delta)?;
        self.follow_player();
        Ok(report)
    }

    /// See [`PredictionEngine::disconnect`].
    pub fn disconnect(&mut self) {
        self.engine.disconnect();
    }

    /// Snapshot for rendering, once synced.
    pub fn view(&self) -> Option<ClientView> {
        let replica = self.engine.replica()?;
        Some(ClientView {
            player_id: replica.player_id(),
            canonical_sequence: replica.canonical_sequence(),
            pending: replica.pending().len(),
            world: replica.predicted().clone(),
            camera: self.camera,
        })
    }

    fn follow_player(&mut self) {
        if let Some(replica) = self.engine.replica()
            && let Some(player) = replica.predicted().player(replica.player_id())
        {
            self.camera.center_on(player.position());
        }
    }
}

#[cfg(test)]
mod tests {
    use dotland_world::{ContentPack, Grid, GridPos, Inventory, PlayerState};

    use super::*;

    #[test]
    fn test_camera_follows_predicted_player() {
        let content = Arc::new(ContentPack::builtin().into_tables().unwrap());
        let mut world = WorldState::new(Grid::new(4, 4, Arc::clone(&content)).unwrap());
        let me = PlayerState::new(GridPos::new(1, 1), world.grid(), Inventory::new(1)).unwrap();
        world.insert_player(PlayerId(5), me).unwrap();

        let mut state = ClientGameState::default();
        assert!(state.view().is_none());
        state.begin_sync("0.1.0").unwrap();
        state
            .apply_snapshot(
                &Snapshot {
                    player_id: PlayerId(5),
                    canonical_sequence: 3,
                    ack_sequence: 0,
                    world: world.to_snapshot(),
                },
                content,
            )
            .unwrap();
        assert_eq!((state.camera().x(), state.camera().y()), (1.0, 1.0));

        state.input(CommandKind::Move { x: 2, y: 1 }, 0).unwrap();
        assert!(state.set_zoom(2.5));
        assert!(!state.set_zoom(0.0));

        let view = state.view().unwrap();
        assert_eq!(view.player_id, PlayerId(5));
        assert_eq!(view.pending, 1);
        assert_eq!(view.canonical_sequence, 3);
        assert_eq!((view.camera.x(), view.camera.y()), (2.0, 1.0));
        assert_eq!(view.camera.zoom(), 2.5);
        assert_eq!(view.world.player(PlayerId(5)).unwrap().position(), GridPos::new(2, 1));

        state.disconnect();
        assert_eq!(state.phase(), SyncPhase::Disconnected);
        assert!(state.view().is_none());
    }
}
