//! Command rules shared by client prediction and the server authority.
//!
//! [`apply_command`] is deterministic: the same command applied to equal
//! states yields equal states on every machine, which is what lets the
//! client replay its unacknowledged commands after a correction. A rejected
//! command leaves the state untouched.

use dotland_world::{EntityError, GridPos, MAX_HEALTH, PlayerId, WorldError, WorldState};

use crate::command::CommandKind;
use crate::delta::FieldPath;

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// The issuing player is not in the world.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// The move target is off the grid.
    #[error("target {0} is out of bounds")]
    OutOfBounds(GridPos),

    /// The move target is not a direct neighbour of the current cell.
    #[error("cannot move from {from} to {to} in one step")]
    NotAdjacent {
        /// Current position.
        from: GridPos,
        /// Requested target.
        to: GridPos,
    },

    /// The move target is obstructed or taken by another player.
    #[error("target {0} is occupied")]
    Blocked(GridPos),

    /// An entity record refused the change.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// A world edit failed.
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Applies `kind` on behalf of `player`. Returns the field paths that
/// changed. On error nothing has been modified.
pub fn apply_command(
    world: &mut WorldState,
    player: PlayerId,
    kind: &CommandKind,
) -> Result<Vec<FieldPath>, InvariantViolation> {
    let current = world
        .player(player)
        .ok_or(InvariantViolation::UnknownPlayer(player))?;

    match *kind {
        CommandKind::Move { x, y } => {
            let from = current.position();
            let to = GridPos::new(x, y);
            if !world.grid().is_valid_position(x, y) {
                return Err(InvariantViolation::OutOfBounds(to));
            }
            if from.manhattan(to) != 1 {
                return Err(InvariantViolation::NotAdjacent { from, to });
            }
            if !world.is_walkable(to, player) {
                return Err(InvariantViolation::Blocked(to));
            }
            world.set_player_position(player, to)?;

            let mut touched = Vec::with_capacity(1);
            if from.x != to.x {
                touched.push(FieldPath::PlayerX(player));
            }
            if from.y != to.y {
                touched.push(FieldPath::PlayerY(player));
            }
            Ok(touched)
        }

        CommandKind::UseItem { slot } => {
            let health = current.health();
            let content = std::sync::Arc::clone(world.content());
            let state = world.player_mut(player)?;
            let item = state.inventory_mut().consume_one(slot)?;
            let heal = content.items.lookup(item).map_or(0, |def| i32::from(def.heal));

            let mut touched = vec![FieldPath::PlayerInventory(player)];
            let healed = (health + heal).min(MAX_HEALTH);
            if healed != health {
                state.set_health(healed)?;
                touched.push(FieldPath::PlayerHealth(player));
            }
            Ok(touched)
        }

        CommandKind::DropItem { slot } => {
            world.player_mut(player)?.inventory_mut().remove(slot)?;
            Ok(vec![FieldPath::PlayerInventory(player)])
        }
    }
}
