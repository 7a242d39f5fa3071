//! Player, inventory and camera records.
//!
//! Fields are private; every mutation goes through a setter that enforces
//! the record's invariants. Records decoded from the wire bypass the
//! setters, so receivers must call the `validate` methods before trusting
//! them.

use serde::{Deserialize, Serialize};

use crate::content::{Item, ItemId, ItemTable};
use crate::grid::{Grid, GridPos};

/// Highest health a player can have.
pub const MAX_HEALTH: i32 = 100;

/// Errors raised when a mutation would break an entity invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    /// Health outside `[0, 100]`.
    #[error("health {0} outside [0, 100]")]
    HealthOutOfRange(i32),

    /// The inventory already holds its maximum number of slots.
    #[error("inventory full ({capacity} slots)")]
    InventoryFull {
        /// Slot capacity.
        capacity: usize,
    },

    /// No slot with that index.
    #[error("no inventory slot {0}")]
    NoSuchSlot(usize),

    /// A non-stackable item with a count other than 1.
    #[error("item {item:?} is not stackable, count must be 1 (got {count})")]
    NotStackable {
        /// Offending item.
        item: ItemId,
        /// Requested count.
        count: u32,
    },

    /// A stack count of zero or above the item's capacity.
    #[error("invalid stack size {count} for item {item:?}")]
    InvalidStack {
        /// Offending item.
        item: ItemId,
        /// Requested count.
        count: u32,
    },

    /// The item id is missing from the item table.
    #[error("unknown item {0:?}")]
    UnknownItem(ItemId),

    /// The position is not on the grid.
    #[error("position {0} is off the grid")]
    InvalidPosition(GridPos),
}

// ---------------------------------------------------------------------------
// ItemInstance
// ---------------------------------------------------------------------------

/// A quantity of one item held in an inventory slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInstance {
    item: ItemId,
    count: u32,
}

impl ItemInstance {
    /// Creates an instance, enforcing the item's stacking rules.
    pub fn new(item: &Item, count: u32) -> Result<Self, EntityError> {
        check_stack(item, count)?;
        Ok(Self {
            item: item.id,
            count,
        })
    }

    /// The referenced item.
    pub fn item(&self) -> ItemId {
        self.item
    }

    /// Units in this slot.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Re-checks the stacking rules against the item table.
    pub fn validate(&self, items: &ItemTable) -> Result<(), EntityError> {
        let def = items
            .lookup(self.item)
            .ok_or(EntityError::UnknownItem(self.item))?;
        check_stack(def, self.count)
    }
}

fn check_stack(item: &Item, count: u32) -> Result<(), EntityError> {
    if !item.stackable {
        if count != 1 {
            return Err(EntityError::NotStackable {
                item: item.id,
                count,
            });
        }
        return Ok(());
    }
    if count == 0 || item.max_capacity.is_some_and(|max| count > max) {
        return Err(EntityError::InvalidStack {
            item: item.id,
            count,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Ordered item slots with a fixed slot capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    items: Vec<ItemInstance>,
    max_capacity: usize,
}

impl Inventory {
    /// Creates an empty inventory holding at most `max_capacity` slots.
    pub fn new(max_capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            max_capacity,
        }
    }

    /// Slot capacity.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// The slots in display order.
    pub fn items(&self) -> &[ItemInstance] {
        &self.items
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns `true` if no further slot can be added.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_capacity
    }

    /// Appends a slot. Fails if the inventory is full.
    pub fn insert(&mut self, item: ItemInstance) -> Result<(), EntityError> {
        if self.is_full() {
            return Err(EntityError::InventoryFull {
                capacity: self.max_capacity,
            });
        }
        self.items.push(item);
        Ok(())
    }

    /// Removes and returns a whole slot.
    pub fn remove(&mut self, slot: usize) -> Result<ItemInstance, EntityError> {
        if slot >= self.items.len() {
            return Err(EntityError::NoSuchSlot(slot));
        }
        Ok(self.items.remove(slot))
    }

    /// Takes one unit out of a slot, removing the slot when it empties.
    /// Returns the item id of the consumed unit.
    pub fn consume_one(&mut self, slot: usize) -> Result<ItemId, EntityError> {
        let entry = self
            .items
            .get_mut(slot)
            .ok_or(EntityError::NoSuchSlot(slot))?;
        let item = entry.item;
        if entry.count > 1 {
            entry.count -= 1;
        } else {
            self.items.remove(slot);
        }
        Ok(item)
    }

    /// Re-checks capacity and every slot against the item table.
    pub fn validate(&self, items: &ItemTable) -> Result<(), EntityError> {
        if self.items.len() > self.max_capacity {
            return Err(EntityError::InventoryFull {
                capacity: self.max_capacity,
            });
        }
        self.items.iter().try_for_each(|slot| slot.validate(items))
    }
}

// ---------------------------------------------------------------------------
// PlayerState
// ---------------------------------------------------------------------------

/// Position, health and inventory of one player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    position: GridPos,
    health: i32,
    inventory: Inventory,
}

impl PlayerState {
    /// Creates a player at full health.
    pub fn new(position: GridPos, grid: &Grid, inventory: Inventory) -> Result<Self, EntityError> {
        check_position(position, grid)?;
        Ok(Self {
            position,
            health: MAX_HEALTH,
            inventory,
        })
    }

    /// Current position.
    pub fn position(&self) -> GridPos {
        self.position
    }

    /// Current health.
    pub fn health(&self) -> i32 {
        self.health
    }

    /// The player's inventory.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Moves the player. Only checks that the target is on the grid.
    pub fn set_position(&mut self, position: GridPos, grid: &Grid) -> Result<(), EntityError> {
        check_position(position, grid)?;
        self.position = position;
        Ok(())
    }

    /// Sets health, rejecting values outside `[0, 100]`.
    pub fn set_health(&mut self, health: i32) -> Result<(), EntityError> {
        if !(0..=MAX_HEALTH).contains(&health) {
            return Err(EntityError::HealthOutOfRange(health));
        }
        self.health = health;
        Ok(())
    }

    /// Replaces the inventory after validating it.
    pub fn set_inventory(
        &mut self,
        inventory: Inventory,
        items: &ItemTable,
    ) -> Result<(), EntityError> {
        inventory.validate(items)?;
        self.inventory = inventory;
        Ok(())
    }

    /// Mutable access to the inventory. Its own methods keep it valid.
    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    /// Re-checks every invariant.
    pub fn validate(&self, grid: &Grid, items: &ItemTable) -> Result<(), EntityError> {
        check_position(self.position, grid)?;
        if !(0..=MAX_HEALTH).contains(&self.health) {
            return Err(EntityError::HealthOutOfRange(self.health));
        }
        self.inventory.validate(items)
    }
}

fn check_position(position: GridPos, grid: &Grid) -> Result<(), EntityError> {
    if grid.is_valid_position(position.x, position.y) {
        Ok(())
    } else {
        Err(EntityError::InvalidPosition(position))
    }
}

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// Client-side view position and zoom. Never synchronised.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    x: f32,
    y: f32,
    zoom: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Camera {
    /// Horizontal position in grid units.
    pub fn x(&self) -> f32 {
        self.x
    }

    /// Vertical position in grid units.
    pub fn y(&self) -> f32 {
        self.y
    }

    /// Zoom factor.
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Centres the camera on a grid cell.
    pub fn center_on(&mut self, pos: GridPos) {
        self.x = pos.x as f32;
        self.y = pos.y as f32;
    }

    /// Sets the zoom factor. Non-positive or non-finite values are ignored
    /// and `false` is returned.
    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        if !zoom.is_finite() || zoom <= 0.0 {
            return false;
        }
        self.zoom = zoom;
        true
    }
}
