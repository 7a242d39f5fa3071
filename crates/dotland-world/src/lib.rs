//! Dotland data model: build versions, static content tables, the cell grid
//! and the player/inventory/camera records that get synchronised.

pub mod content;
pub mod entity;
pub mod grid;
pub mod version;
pub mod world;

pub use content::{
    CellType, CellTypeId, CellTypeTable, ContentError, ContentPack, ContentTables, Item, ItemId,
    ItemTable,
};
pub use entity::{Camera, EntityError, Inventory, ItemInstance, MAX_HEALTH, PlayerState};
pub use grid::{CellEntry, CellInstance, Grid, GridError, GridPos};
pub use version::{
    API_VERSION, CLIENT_VERSION, Version, VersionError, check_compatibility, is_compatible,
};
pub use world::{PlayerId, WorldError, WorldSnapshot, WorldState};
