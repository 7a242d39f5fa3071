//! Sparse state patches and full snapshots exchanged between server and
//! client.
//!
//! A [`StateDelta`] maps [`FieldPath`]s to new values. Paths order player
//! presence before player fields, so a delta that spawns a player and moves
//! it applies cleanly in map order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use dotland_world::{
    CellInstance, GridPos, Inventory, PlayerId, PlayerState, WorldError, WorldSnapshot, WorldState,
};

/// Address of one synchronised field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldPath {
    /// Presence of a player (`players.<id>`).
    Player(PlayerId),
    /// `players.<id>.x`
    PlayerX(PlayerId),
    /// `players.<id>.y`
    PlayerY(PlayerId),
    /// `players.<id>.health`
    PlayerHealth(PlayerId),
    /// `players.<id>.inventory`
    PlayerInventory(PlayerId),
    /// `cells.<x>.<y>`
    Cell {
        /// Column.
        x: i32,
        /// Row.
        y: i32,
    },
}

impl FieldPath {
    /// The player this path belongs to, if any.
    pub fn player(&self) -> Option<PlayerId> {
        match *self {
            Self::Player(id)
            | Self::PlayerX(id)
            | Self::PlayerY(id)
            | Self::PlayerHealth(id)
            | Self::PlayerInventory(id) => Some(id),
            Self::Cell { .. } => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player(id) => write!(f, "players.{id}"),
            Self::PlayerX(id) => write!(f, "players.{id}.x"),
            Self::PlayerY(id) => write!(f, "players.{id}.y"),
            Self::PlayerHealth(id) => write!(f, "players.{id}.health"),
            Self::PlayerInventory(id) => write!(f, "players.{id}.inventory"),
            Self::Cell { x, y } => write!(f, "cells.{x}.{y}"),
        }
    }
}

/// New value for a [`FieldPath`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Whole player record, or `None` when the player left.
    Player(Option<PlayerState>),
    /// One coordinate.
    Coord(i32),
    /// Health.
    Health(i32),
    /// Whole inventory.
    Inventory(Inventory),
    /// Cell contents.
    Cell(Option<CellInstance>),
}

/// A delta could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// The value kind does not fit the path.
    #[error("value does not fit field {0}")]
    Mismatch(FieldPath),

    /// The value broke a world invariant.
    #[error("field {path}: {source}")]
    Invalid {
        /// Offending field.
        path: FieldPath,
        /// What was wrong.
        #[source]
        source: WorldError,
    },
}

/// Sparse patch of canonical state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Server sequence after the changes in this delta.
    pub canonical_sequence: u64,
    /// Highest command sequence of the receiving client the server has
    /// processed, accepted or rejected.
    pub ack_sequence: u64,
    /// Changed fields.
    pub fields: BTreeMap<FieldPath, FieldValue>,
}

impl StateDelta {
    /// Returns `true` if the delta carries no field changes.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Full state sent once when a client joins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The receiving client's player.
    pub player_id: PlayerId,
    /// Server sequence the snapshot reflects.
    pub canonical_sequence: u64,
    /// The receiving client's ack at snapshot time.
    pub ack_sequence: u64,
    /// Grid and players.
    pub world: WorldSnapshot,
}

/// Reads the current value at `path`. Player sub-fields of an absent
/// player read as `None`; player presence always has a value.
pub fn read_field(world: &WorldState, path: FieldPath) -> Option<FieldValue> {
    match path {
        FieldPath::Player(id) => Some(FieldValue::Player(world.player(id).cloned())),
        FieldPath::PlayerX(id) => world
            .player(id)
            .map(|p| FieldValue::Coord(p.position().x)),
        FieldPath::PlayerY(id) => world
            .player(id)
            .map(|p| FieldValue::Coord(p.position().y)),
        FieldPath::PlayerHealth(id) => world.player(id).map(|p| FieldValue::Health(p.health())),
        FieldPath::PlayerInventory(id) => world
            .player(id)
            .map(|p| FieldValue::Inventory(p.inventory().clone())),
        FieldPath::Cell { x, y } => world
            .grid()
            .get(x, y)
            .ok()
            .map(|cell| FieldValue::Cell(cell.copied())),
    }
}

/// Writes every field in map order. Stops at the first failure, leaving
/// `world` partially updated; callers apply onto a scratch copy.
pub fn apply_fields(
    world: &mut WorldState,
    fields: &BTreeMap<FieldPath, FieldValue>,
) -> Result<(), DeltaError> {
    for (path, value) in fields {
        apply_field(world, *path, value).map_err(|source| match source {
            FieldWriteError::Mismatch => DeltaError::Mismatch(*path),
            FieldWriteError::World(source) => DeltaError::Invalid {
                path: *path,
                source,
            },
        })?;
    }
    Ok(())
}

enum FieldWriteError {
    Mismatch,
    World(WorldError),
}

impl From<WorldError> for FieldWriteError {
    fn from(err: WorldError) -> Self {
        Self::World(err)
    }
}

fn apply_field(
    world: &mut WorldState,
    path: FieldPath,
    value: &FieldValue,
) -> Result<(), FieldWriteError> {
    match (path, value) {
        (FieldPath::Player(id), FieldValue::Player(Some(state))) => {
            world.insert_player(id, state.clone())?;
        }
        (FieldPath::Player(id), FieldValue::Player(None)) => {
            world.remove_player(id);
        }
        (FieldPath::PlayerX(id), FieldValue::Coord(x)) => {
            let current = world.player(id).ok_or(WorldError::UnknownPlayer(id))?;
            let pos = GridPos::new(*x, current.position().y);
            world.set_player_position(id, pos)?;
        }
        (FieldPath::PlayerY(id), FieldValue::Coord(y)) => {
            let current = world.player(id).ok_or(WorldError::UnknownPlayer(id))?;
            let pos = GridPos::new(current.position().x, *y);
            world.set_player_position(id, pos)?;
        }
        (FieldPath::PlayerHealth(id), FieldValue::Health(health)) => {
            world.set_player_health(id, *health)?;
        }
        (FieldPath::PlayerInventory(id), FieldValue::Inventory(inventory)) => {
            world.set_player_inventory(id, inventory.clone())?;
        }
        (FieldPath::Cell { x, y }, FieldValue::Cell(cell)) => {
            world.set_cell(GridPos::new(x, y), *cell)?;
        }
        _ => return Err(FieldWriteError::Mismatch),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dotland_world::{CellTypeId, ContentPack, Grid};

    use super::*;

    const WALL: CellInstance = CellInstance::new(CellTypeId(2));

    fn world() -> WorldState {
        let content = Arc::new(ContentPack::builtin().into_tables().unwrap());
        WorldState::new(Grid::new(5, 5, content).unwrap())
    }

    fn player_at(world: &WorldState, x: i32, y: i32) -> PlayerState {
        PlayerState::new(GridPos::new(x, y), world.grid(), Inventory::new(2)).unwrap()
    }

    #[test]
    fn test_path_display() {
        assert_eq!(FieldPath::PlayerX(PlayerId(3)).to_string(), "players.3.x");
        assert_eq!(FieldPath::Player(PlayerId(3)).to_string(), "players.3");
        assert_eq!(
            FieldPath::PlayerInventory(PlayerId(1)).to_string(),
            "players.1.inventory"
        );
        assert_eq!(FieldPath::Cell { x: 3, y: 4 }.to_string(), "cells.3.4");
    }

    #[test]
    fn test_spawn_then_field_update_in_one_delta() {
        let mut world = world();
        let spawned = player_at(&world, 0, 0);
        let mut fields = BTreeMap::new();
        // Inserted out of order; map order still puts presence first.
        fields.insert(FieldPath::PlayerHealth(PlayerId(4)), FieldValue::Health(60));
        fields.insert(FieldPath::Player(PlayerId(4)), FieldValue::Player(Some(spawned)));
        fields.insert(FieldPath::Cell { x: 1, y: 1 }, FieldValue::Cell(Some(WALL)));

        apply_fields(&mut world, &fields).unwrap();
        assert_eq!(world.player(PlayerId(4)).unwrap().health(), 60);
        assert_eq!(world.grid().get(1, 1).unwrap(), Some(&WALL));
    }

    #[test]
    fn test_read_then_apply_reproduces_state() {
        let mut source = world();
        let p = player_at(&source, 2, 3);
        source.insert_player(PlayerId(1), p).unwrap();
        source.set_cell(GridPos::new(4, 4), Some(WALL)).unwrap();

        let paths = [
            FieldPath::Player(PlayerId(1)),
            FieldPath::PlayerX(PlayerId(1)),
            FieldPath::PlayerY(PlayerId(1)),
            FieldPath::Cell { x: 4, y: 4 },
        ];
        let fields: BTreeMap<_, _> = paths
            .iter()
            .filter_map(|path| read_field(&source, *path).map(|value| (*path, value)))
            .collect();

        let mut target = world();
        apply_fields(&mut target, &fields).unwrap();
        assert_eq!(target, source);
    }

    #[test]
    fn test_absent_player_fields_read_as_none() {
        let world = world();
        assert_eq!(read_field(&world, FieldPath::PlayerX(PlayerId(9))), None);
        assert_eq!(
            read_field(&world, FieldPath::Player(PlayerId(9))),
            Some(FieldValue::Player(None))
        );
        assert_eq!(read_field(&world, FieldPath::Cell { x: 9, y: 9 }), None);
    }

    #[test]
    fn test_mismatched_value_rejected() {
        let mut world = world();
        let mut fields = BTreeMap::new();
        fields.insert(FieldPath::Cell { x: 0, y: 0 }, FieldValue::Health(5));
        assert_eq!(
            apply_fields(&mut world, &fields),
            Err(DeltaError::Mismatch(FieldPath::Cell { x: 0, y: 0 }))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut world = world();
        let p = player_at(&world, 0, 0);
        world.insert_player(PlayerId(1), p).unwrap();

        let cases = [
            (FieldPath::PlayerHealth(PlayerId(1)), FieldValue::Health(101)),
            (FieldPath::PlayerX(PlayerId(1)), FieldValue::Coord(5)),
            (FieldPath::PlayerY(PlayerId(2)), FieldValue::Coord(1)),
            (
                FieldPath::Cell { x: 0, y: 0 },
                FieldValue::Cell(Some(CellInstance::new(CellTypeId(99)))),
            ),
        ];
        for (path, value) in cases {
            let fields = BTreeMap::from([(path, value)]);
            assert!(
                matches!(apply_fields(&mut world, &fields), Err(DeltaError::Invalid { .. })),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_delta_wire_roundtrip() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldPath::PlayerX(PlayerId(1)), FieldValue::Coord(3));
        fields.insert(FieldPath::Player(PlayerId(2)), FieldValue::Player(None));
        let delta = StateDelta {
            canonical_sequence: 12,
            ack_sequence: 4,
            fields,
        };
        let bytes = postcard::to_allocvec(&delta).unwrap();
        let decoded: StateDelta = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, delta);
    }
}
