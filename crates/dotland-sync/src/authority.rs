//! Server-authoritative world state and delta broadcast.
//!
//! The server owns the canonical [`WorldState`]. Clients submit
//! [`SequencedCommand`]s, which are validated with the same rules the
//! client predicts with. Every accepted change marks its field dirty; a
//! [`broadcast`](BroadcastAuthority::broadcast) turns the dirty set into one
//! [`StateDelta`] per client, stamped with that client's ack.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use dotland_world::{
    CellInstance, ContentTables, EntityError, GridPos, Inventory, ItemId, ItemInstance, PlayerId,
    PlayerState, WorldError, WorldState,
};

use crate::command::SequencedCommand;
use crate::delta::{FieldPath, Snapshot, StateDelta, read_field};
use crate::rules::{InvariantViolation, apply_command};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters for spawning players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Preferred spawn cell; the nearest walkable cell is used.
    pub spawn: GridPos,
    /// Slot capacity of every new inventory.
    pub inventory_capacity: usize,
    /// Items granted on join, as `(item, count)`.
    pub starting_items: Vec<(ItemId, u32)>,
    /// Maximum concurrent players.
    pub max_players: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            spawn: GridPos::new(0, 0),
            inventory_capacity: 8,
            starting_items: Vec::new(),
            max_players: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and verdicts
// ---------------------------------------------------------------------------

/// Errors from server-side world management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// No room for another player.
    #[error("server full ({max} players)")]
    ServerFull {
        /// Configured maximum.
        max: usize,
    },

    /// Every cell is blocked or taken.
    #[error("no free cell to spawn on")]
    NoFreeCell,

    /// The item id is missing from the content tables.
    #[error("unknown item {0:?}")]
    UnknownItem(ItemId),

    /// A world edit failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// An entity record refused the change.
    #[error(transparent)]
    Entity(#[from] EntityError),
}

/// Outcome of a submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Applied; canonical state is now at `canonical_sequence`.
    Accepted {
        /// New canonical sequence.
        canonical_sequence: u64,
    },
    /// Refused; canonical state unchanged. The command is still acked.
    Rejected(InvariantViolation),
    /// Sequence at or below the player's ack; ignored.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default)]
struct ClientRecord {
    last_acked: u64,
    last_sent_ack: u64,
}

// ---------------------------------------------------------------------------
// BroadcastAuthority
// ---------------------------------------------------------------------------

/// Owner of the canonical world. Callers serialise access (one writer).
#[derive(Debug)]
pub struct BroadcastAuthority {
    world: WorldState,
    canonical_sequence: u64,
    clients: FxHashMap<PlayerId, ClientRecord>,
    dirty: BTreeSet<FieldPath>,
    next_player_id: u64,
    config: AuthorityConfig,
}

impl BroadcastAuthority {
    /// Wraps an initial world. Players already in it are not tracked as
    /// clients.
    pub fn new(world: WorldState, config: AuthorityConfig) -> Self {
        let next_player_id = world.players().map(|(id, _)| id.0).max().unwrap_or(0) + 1;
        Self {
            world,
            canonical_sequence: 0,
            clients: FxHashMap::default(),
            dirty: BTreeSet::new(),
            next_player_id,
            config,
        }
    }

    /// The canonical world.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Content tables of the canonical world.
    pub fn content(&self) -> &Arc<ContentTables> {
        self.world.content()
    }

    /// Current canonical sequence.
    pub fn canonical_sequence(&self) -> u64 {
        self.canonical_sequence
    }

    /// Highest command sequence processed for `player`.
    pub fn ack_for(&self, player: PlayerId) -> Option<u64> {
        self.clients.get(&player).map(|record| record.last_acked)
    }

    /// Spawns a new player and returns its initial snapshot.
    pub fn join(&mut self) -> Result<Snapshot, AuthorityError> {
        if self.clients.len() >= self.config.max_players {
            return Err(AuthorityError::ServerFull {
                max: self.config.max_players,
            });
        }
        let id = PlayerId(self.next_player_id);
        let spawn = self.find_spawn(id).ok_or(AuthorityError::NoFreeCell)?;

        let mut inventory = Inventory::new(self.config.inventory_capacity);
        for &(item, count) in &self.config.starting_items {
            let def = self
                .content()
                .items
                .lookup(item)
                .ok_or(AuthorityError::UnknownItem(item))?;
            inventory.insert(ItemInstance::new(def, count)?)?;
        }
        let state = PlayerState::new(spawn, self.world.grid(), inventory)?;
        self.world.insert_player(id, state)?;

        self.next_player_id += 1;
        self.clients.insert(id, ClientRecord::default());
        self.touch([FieldPath::Player(id)]);
        info!("Player {id} joined at {spawn}");

        Ok(Snapshot {
            player_id: id,
            canonical_sequence: self.canonical_sequence,
            ack_sequence: 0,
            world: self.world.to_snapshot(),
        })
    }

    /// Removes a player and its ack record.
    pub fn leave(&mut self, player: PlayerId) -> Option<PlayerState> {
        self.clients.remove(&player);
        let state = self.world.remove_player(player)?;
        self.touch([FieldPath::Player(player)]);
        info!("Player {player} left");
        Some(state)
    }

    /// Validates and applies one command. The player's ack advances
    /// whether or not the command is accepted.
    pub fn submit(&mut self, player: PlayerId, command: &SequencedCommand) -> Verdict {
        let Some(record) = self.clients.get_mut(&player) else {
            warn!("Command {} from unknown player {player}", command.sequence);
            return Verdict::Rejected(InvariantViolation::UnknownPlayer(player));
        };
        if command.sequence <= record.last_acked {
            debug!(
                "Duplicate command {} from player {player} (ack {})",
                command.sequence, record.last_acked
            );
            return Verdict::Duplicate;
        }
        record.last_acked = command.sequence;

        match apply_command(&mut self.world, player, &command.kind) {
            Ok(touched) => {
                self.touch(touched);
                Verdict::Accepted {
                    canonical_sequence: self.canonical_sequence,
                }
            }
            Err(violation) => {
                debug!(
                    "Rejected command {} from player {player}: {violation}",
                    command.sequence
                );
                Verdict::Rejected(violation)
            }
        }
    }

    /// Builds one delta per client holding every field changed since the
    /// previous broadcast. Clients with nothing new are skipped. The
    /// returned deltas are owned and may be sent after releasing the lock.
    pub fn broadcast(&mut self) -> Vec<(PlayerId, StateDelta)> {
        let fields: BTreeMap<_, _> = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|path| read_field(&self.world, path).map(|value| (path, value)))
            .collect();

        let mut out: Vec<(PlayerId, StateDelta)> = self
            .clients
            .iter_mut()
            .filter(|(_, record)| !fields.is_empty() || record.last_acked != record.last_sent_ack)
            .map(|(id, record)| {
                record.last_sent_ack = record.last_acked;
                let delta = StateDelta {
                    canonical_sequence: self.canonical_sequence,
                    ack_sequence: record.last_acked,
                    fields: fields.clone(),
                };
                (*id, delta)
            })
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Server-side cell edit.
    pub fn set_cell(
        &mut self,
        pos: GridPos,
        cell: Option<CellInstance>,
    ) -> Result<Option<CellInstance>, AuthorityError> {
        let previous = self.world.set_cell(pos, cell)?;
        self.touch([FieldPath::Cell { x: pos.x, y: pos.y }]);
        Ok(previous)
    }

    /// Adds `count` units of `item` as a new inventory slot.
    pub fn grant_item(
        &mut self,
        player: PlayerId,
        item: ItemId,
        count: u32,
    ) -> Result<(), AuthorityError> {
        let content = Arc::clone(self.content());
        let def = content
            .items
            .lookup(item)
            .ok_or(AuthorityError::UnknownItem(item))?;
        let instance = ItemInstance::new(def, count)?;
        self.world
            .player_mut(player)?
            .inventory_mut()
            .insert(instance)?;
        self.touch([FieldPath::PlayerInventory(player)]);
        Ok(())
    }

    fn touch(&mut self, paths: impl IntoIterator<Item = FieldPath>) {
        self.canonical_sequence += 1;
        self.dirty.extend(paths);
    }

    /// Nearest walkable cell to the configured spawn point. Ties go to the
    /// first cell in row-major order.
    fn find_spawn(&self, mover: PlayerId) -> Option<GridPos> {
        let grid = self.world.grid();
        let spawn = self.config.spawn;
        let mut best: Option<(u64, GridPos)> = None;
        for y in 0..grid.height() as i32 {
            for x in 0..grid.width() as i32 {
                let pos = GridPos::new(x, y);
                if !self.world.is_walkable(pos, mover) {
                    continue;
                }
                let distance = pos.manhattan(spawn);
                if best.is_none_or(|(d, _)| distance < d) {
                    best = Some((distance, pos));
                }
            }
        }
        best.map(|(_, pos)| pos)
    }
}
