//! Static content tables: item definitions and cell types.
//!
//! Tables are built once at startup (from a RON content pack or the built-in
//! defaults) and shared read-only through [`ContentTables`]. Every runtime
//! record refers to content by id only.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Identifier of an [`Item`] definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

/// Identifier of a [`CellType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellTypeId(pub u32);

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// An item from the item database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique id.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Whether several units share one inventory slot.
    pub stackable: bool,
    /// Largest stack a slot may hold. `None` means unbounded.
    #[serde(default)]
    pub max_capacity: Option<u32>,
    /// Health restored when one unit is used.
    #[serde(default)]
    pub heal: u8,
}

/// The kind of a grid cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellType {
    /// Unique id.
    pub id: CellTypeId,
    /// Name used in logs and tooling.
    pub debug_name: String,
    /// Identifier the renderer uses to pick a sprite.
    pub draw_id: String,
    /// Whether players are blocked by this cell.
    pub obstructs: bool,
}

/// Errors raised while building content tables.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Two item definitions share an id.
    #[error("duplicate item id {0:?}")]
    DuplicateItem(ItemId),
    /// Two cell types share an id.
    #[error("duplicate cell type id {0:?}")]
    DuplicateCellType(CellTypeId),
    /// A stackable item declares a zero max capacity.
    #[error("item {0:?} has a zero stack capacity")]
    ZeroCapacity(ItemId),
    /// The content pack could not be read.
    #[error("failed to read content pack: {0}")]
    Read(#[source] std::io::Error),
    /// The content pack is not valid RON.
    #[error("failed to parse content pack: {0}")]
    Parse(#[source] ron::error::SpannedError),
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Read-only lookup of [`Item`] definitions by id.
#[derive(Debug, Default)]
pub struct ItemTable {
    items: HashMap<ItemId, Item>,
}

impl ItemTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition.
    pub fn register(&mut self, item: Item) -> Result<(), ContentError> {
        if item.stackable && item.max_capacity == Some(0) {
            return Err(ContentError::ZeroCapacity(item.id));
        }
        if self.items.contains_key(&item.id) {
            return Err(ContentError::DuplicateItem(item.id));
        }
        self.items.insert(item.id, item);
        Ok(())
    }

    /// Looks up a definition.
    pub fn lookup(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no items are defined.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Read-only lookup of [`CellType`]s by id.
#[derive(Debug, Default)]
pub struct CellTypeTable {
    cells: HashMap<CellTypeId, CellType>,
}

impl CellTypeTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cell type.
    pub fn register(&mut self, cell: CellType) -> Result<(), ContentError> {
        if self.cells.contains_key(&cell.id) {
            return Err(ContentError::DuplicateCellType(cell.id));
        }
        self.cells.insert(cell.id, cell);
        Ok(())
    }

    /// Looks up a cell type.
    pub fn lookup(&self, id: CellTypeId) -> Option<&CellType> {
        self.cells.get(&id)
    }

    /// Number of cell types.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` if no cell types are defined.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Both content tables, shared by every component of one session.
#[derive(Debug, Default)]
pub struct ContentTables {
    /// Item definitions.
    pub items: ItemTable,
    /// Cell types.
    pub cells: CellTypeTable,
}

// ---------------------------------------------------------------------------
// Content pack
// ---------------------------------------------------------------------------

/// On-disk form of the content tables.
///
/// ```ron
/// (
///     items: [(id: (1), name: "apple", stackable: true, max_capacity: Some(10), heal: 5)],
///     cells: [(id: (1), debug_name: "wall", draw_id: "wall", obstructs: true)],
/// )
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPack {
    /// Item definitions.
    pub items: Vec<Item>,
    /// Cell types.
    pub cells: Vec<CellType>,
}

impl ContentPack {
    /// Parses a pack from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ContentError> {
        ron::from_str(text).map_err(ContentError::Parse)
    }

    /// Reads a pack from a RON file.
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let text = std::fs::read_to_string(path).map_err(ContentError::Read)?;
        let pack = Self::from_ron(&text)?;
        tracing::info!(
            "Loaded content pack from {} ({} items, {} cell types)",
            path.display(),
            pack.items.len(),
            pack.cells.len()
        );
        Ok(pack)
    }

    /// The content every session starts with when no pack is configured.
    pub fn builtin() -> Self {
        Self {
            items: vec![
                Item {
                    id: ItemId(1),
                    name: "apple".to_string(),
                    stackable: true,
                    max_capacity: Some(10),
                    heal: 5,
                },
                Item {
                    id: ItemId(2),
                    name: "sword".to_string(),
                    stackable: false,
                    max_capacity: None,
                    heal: 0,
                },
                Item {
                    id: ItemId(3),
                    name: "pebble".to_string(),
                    stackable: true,
                    max_capacity: None,
                    heal: 0,
                },
            ],
            cells: vec![
                CellType {
                    id: CellTypeId(1),
                    debug_name: "floor".to_string(),
                    draw_id: "floor".to_string(),
                    obstructs: false,
                },
                CellType {
                    id: CellTypeId(2),
                    debug_name: "wall".to_string(),
                    draw_id: "wall".to_string(),
                    obstructs: true,
                },
                CellType {
                    id: CellTypeId(3),
                    debug_name: "water".to_string(),
                    draw_id: "water".to_string(),
                    obstructs: true,
                },
            ],
        }
    }

    /// Builds the lookup tables, rejecting duplicate ids.
    pub fn into_tables(self) -> Result<ContentTables, ContentError> {
        let mut tables = ContentTables::default();
        for item in self.items {
            tables.items.register(item)?;
        }
        for cell in self.cells {
            tables.cells.register(cell)?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pack_builds_tables() {
        let tables = ContentPack::builtin().into_tables().unwrap();
        assert_eq!(tables.items.len(), 3);
        assert_eq!(tables.cells.len(), 3);
        assert!(tables.cells.lookup(CellTypeId(2)).unwrap().obstructs);
        assert!(!tables.cells.lookup(CellTypeId(1)).unwrap().obstructs);
        assert!(tables.items.lookup(ItemId(99)).is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut pack = ContentPack::builtin();
        pack.items.push(pack.items[0].clone());
        assert!(matches!(
            pack.into_tables(),
            Err(ContentError::DuplicateItem(ItemId(1)))
        ));

        let mut pack = ContentPack::builtin();
        pack.cells.push(pack.cells[1].clone());
        assert!(matches!(
            pack.into_tables(),
            Err(ContentError::DuplicateCellType(CellTypeId(2)))
        ));
    }

    #[test]
    fn test_zero_stack_capacity_rejected() {
        let mut table = ItemTable::new();
        let err = table
            .register(Item {
                id: ItemId(7),
                name: "void".to_string(),
                stackable: true,
                max_capacity: Some(0),
                heal: 0,
            })
            .unwrap_err();
        assert!(matches!(err, ContentError::ZeroCapacity(ItemId(7))));
    }

    #[test]
    fn test_pack_parses_from_ron() {
        let text = r#"(
            items: [(id: (4), name: "gem", stackable: false)],
            cells: [(id: (9), debug_name: "rock", draw_id: "rock", obstructs: true)],
        )"#;
        let pack = ContentPack::from_ron(text).unwrap();
        assert_eq!(pack.items[0].id, ItemId(4));
        assert_eq!(pack.items[0].max_capacity, None);
        assert_eq!(pack.items[0].heal, 0);
        assert!(pack.cells[0].obstructs);
    }

    #[test]
    fn test_pack_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.ron");
        let pack = ContentPack::builtin();
        std::fs::write(&path, ron::to_string(&pack).unwrap()).unwrap();
        assert_eq!(ContentPack::load(&path).unwrap(), pack);
    }

    #[test]
    fn test_missing_pack_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ContentPack::load(&dir.path().join("nope.ron"));
        assert!(matches!(result, Err(ContentError::Read(_))));
    }
}
