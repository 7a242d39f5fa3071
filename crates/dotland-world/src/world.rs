//! The synchronised aggregate: one grid plus every player on it.
//!
//! The grid sits behind an [`Arc`] and is copied on first write, so the
//! canonical and predicted copies a client keeps share cell storage until
//! one of them edits a cell.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::ContentTables;
use crate::entity::{EntityError, Inventory, PlayerState};
use crate::grid::{CellEntry, CellInstance, Grid, GridError, GridPos};

/// Identifier of a connected player, assigned by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by world-level edits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// No player with that id.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// A grid access failed.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// A player record broke an invariant.
    #[error("player {player}: {source}")]
    Entity {
        /// The offending player.
        player: PlayerId,
        /// What was wrong.
        #[source]
        source: EntityError,
    },
}

/// Serializable full copy of a [`WorldState`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Grid width.
    pub width: u32,
    /// Grid height.
    pub height: u32,
    /// Occupied cells.
    pub cells: Vec<CellEntry>,
    /// Every player.
    pub players: Vec<(PlayerId, PlayerState)>,
}

/// Grid plus players.
#[derive(Clone, PartialEq, Eq)]
pub struct WorldState {
    grid: Arc<Grid>,
    players: BTreeMap<PlayerId, PlayerState>,
}

impl WorldState {
    /// Creates a world with no players.
    pub fn new(grid: Grid) -> Self {
        Self {
            grid: Arc::new(grid),
            players: BTreeMap::new(),
        }
    }

    /// The grid.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The content tables the grid was built with.
    pub fn content(&self) -> &Arc<ContentTables> {
        self.grid.content()
    }

    /// Looks up a player.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Iterates over players in id order.
    pub fn players(&self) -> impl Iterator<Item = (PlayerId, &PlayerState)> {
        self.players.iter().map(|(id, state)| (*id, state))
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Returns the player standing on `pos`, if any.
    pub fn player_at(&self, pos: GridPos) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|(_, state)| state.position() == pos)
            .map(|(id, _)| *id)
    }

    /// Returns `true` if `pos` is free on the grid and no player other than
    /// `mover` stands there.
    pub fn is_walkable(&self, pos: GridPos, mover: PlayerId) -> bool {
        self.grid.is_free(pos.x, pos.y) && self.player_at(pos).is_none_or(|id| id == mover)
    }

    /// Adds or replaces a player after validating the record.
    pub fn insert_player(&mut self, id: PlayerId, state: PlayerState) -> Result<(), WorldError> {
        state
            .validate(&self.grid, &self.content().items)
            .map_err(|source| WorldError::Entity { player: id, source })?;
        self.players.insert(id, state);
        Ok(())
    }

    /// Removes a player, returning its last state.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerState> {
        self.players.remove(&id)
    }

    /// Moves a player. Only bounds are checked here; occupancy rules belong
    /// to whoever issues the move.
    pub fn set_player_position(&mut self, id: PlayerId, pos: GridPos) -> Result<(), WorldError> {
        let player = self
            .players
            .get_mut(&id)
            .ok_or(WorldError::UnknownPlayer(id))?;
        player
            .set_position(pos, &self.grid)
            .map_err(|source| WorldError::Entity { player: id, source })
    }

    /// Sets a player's health.
    pub fn set_player_health(&mut self, id: PlayerId, health: i32) -> Result<(), WorldError> {
        self.player_mut(id)?
            .set_health(health)
            .map_err(|source| WorldError::Entity { player: id, source })
    }

    /// Replaces a player's inventory.
    pub fn set_player_inventory(
        &mut self,
        id: PlayerId,
        inventory: Inventory,
    ) -> Result<(), WorldError> {
        let content = Arc::clone(self.grid.content());
        self.player_mut(id)?
            .set_inventory(inventory, &content.items)
            .map_err(|source| WorldError::Entity { player: id, source })
    }

    /// Mutable access to one player. The record's setters keep it valid.
    pub fn player_mut(&mut self, id: PlayerId) -> Result<&mut PlayerState, WorldError> {
        self.players
            .get_mut(&id)
            .ok_or(WorldError::UnknownPlayer(id))
    }

    /// Replaces the cell at `pos`, copying the grid first if it is shared.
    pub fn set_cell(
        &mut self,
        pos: GridPos,
        cell: Option<CellInstance>,
    ) -> Result<Option<CellInstance>, WorldError> {
        // Check before make_mut so a failed write never forces a copy.
        self.grid.get(pos.x, pos.y)?;
        Ok(Arc::make_mut(&mut self.grid).set(pos.x, pos.y, cell)?)
    }

    /// Returns `true` if both states share grid storage.
    pub fn shares_grid_with(&self, other: &WorldState) -> bool {
        Arc::ptr_eq(&self.grid, &other.grid)
    }

    /// Full serializable copy.
    pub fn to_snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            width: self.grid.width(),
            height: self.grid.height(),
            cells: self.grid.to_entries(),
            players: self
                .players
                .iter()
                .map(|(id, state)| (*id, state.clone()))
                .collect(),
        }
    }

    /// Rebuilds a world from a snapshot, validating every record.
    pub fn from_snapshot(
        snapshot: &WorldSnapshot,
        content: Arc<ContentTables>,
    ) -> Result<Self, WorldError> {
        let grid = Grid::from_entries(snapshot.width, snapshot.height, &snapshot.cells, content)?;
        let mut world = Self::new(grid);
        for (id, state) in &snapshot.players {
            world.insert_player(*id, state.clone())?;
        }
        Ok(world)
    }
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("grid", &self.grid)
            .field("players", &self.players)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{CellTypeId, ContentPack};

    const WALL: CellInstance = CellInstance::new(CellTypeId(2));

    fn world(width: u32, height: u32) -> WorldState {
        let content = Arc::new(ContentPack::builtin().into_tables().unwrap());
        WorldState::new(Grid::new(width, height, content).unwrap())
    }

    fn spawn(world: &mut WorldState, id: u64, x: i32, y: i32) {
        let state = PlayerState::new(GridPos::new(x, y), world.grid(), Inventory::new(4)).unwrap();
        world.insert_player(PlayerId(id), state).unwrap();
    }

    #[test]
    fn test_walkable_considers_cells_and_other_players() {
        let mut world = world(4, 4);
        spawn(&mut world, 1, 0, 0);
        spawn(&mut world, 2, 1, 0);
        world.set_cell(GridPos::new(0, 1), Some(WALL)).unwrap();

        assert!(!world.is_walkable(GridPos::new(1, 0), PlayerId(1)));
        assert!(world.is_walkable(GridPos::new(1, 0), PlayerId(2)));
        assert!(!world.is_walkable(GridPos::new(0, 1), PlayerId(1)));
        assert!(world.is_walkable(GridPos::new(2, 2), PlayerId(1)));
        assert!(!world.is_walkable(GridPos::new(4, 0), PlayerId(1)));
    }

    #[test]
    fn test_grid_is_copied_on_write() {
        let mut a = world(3, 3);
        let b = a.clone();
        assert!(a.shares_grid_with(&b));

        a.set_cell(GridPos::new(1, 1), Some(WALL)).unwrap();
        assert!(!a.shares_grid_with(&b));
        assert_eq!(b.grid().get(1, 1).unwrap(), None);
        assert_eq!(a.grid().get(1, 1).unwrap(), Some(&WALL));
    }

    #[test]
    fn test_failed_cell_write_keeps_sharing() {
        let mut a = world(3, 3);
        let b = a.clone();
        assert!(a.set_cell(GridPos::new(5, 5), Some(WALL)).is_err());
        assert!(a.shares_grid_with(&b));
    }

    #[test]
    fn test_setters_report_unknown_players() {
        let mut world = world(3, 3);
        assert_eq!(
            world.set_player_health(PlayerId(9), 10),
            Err(WorldError::UnknownPlayer(PlayerId(9)))
        );
        spawn(&mut world, 9, 0, 0);
        assert!(world.set_player_health(PlayerId(9), 10).is_ok());
        assert!(matches!(
            world.set_player_position(PlayerId(9), GridPos::new(3, 3)),
            Err(WorldError::Entity { .. })
        ));
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_state() {
        let mut original = world(6, 2);
        spawn(&mut original, 1, 5, 1);
        spawn(&mut original, 7, 0, 0);
        original.set_cell(GridPos::new(3, 1), Some(WALL)).unwrap();
        original.set_player_health(PlayerId(7), 42).unwrap();

        let snapshot = original.to_snapshot();
        let bytes = postcard::to_allocvec(&snapshot).unwrap();
        let decoded: WorldSnapshot = postcard::from_bytes(&bytes).unwrap();
        let rebuilt = WorldState::from_snapshot(&decoded, Arc::clone(original.content())).unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_snapshot_with_off_grid_player_rejected() {
        let mut original = world(6, 6);
        spawn(&mut original, 1, 5, 5);
        let mut snapshot = original.to_snapshot();
        snapshot.width = 3;
        let result = WorldState::from_snapshot(&snapshot, Arc::clone(original.content()));
        assert!(matches!(result, Err(WorldError::Entity { .. })));
    }
}
