//! Fixed-size grid of cell slots.
//!
//! Slots are stored row-major: the linear index of `(x, y)` is
//! `y * width + x`. Every read and write goes through [`Grid::index`] so the
//! two paths cannot disagree about the layout.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::{CellTypeId, ContentTables};

/// A cell placed on the grid. Refers to an immutable cell type by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellInstance {
    cell_type: CellTypeId,
}

impl CellInstance {
    /// Creates an instance of the given cell type.
    pub const fn new(cell_type: CellTypeId) -> Self {
        Self { cell_type }
    }

    /// The referenced cell type.
    pub const fn cell_type(&self) -> CellTypeId {
        self.cell_type
    }
}

/// A grid coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl GridPos {
    /// Creates a coordinate.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to `other`.
    pub fn manhattan(&self, other: GridPos) -> u64 {
        (self.x as i64 - other.x as i64).unsigned_abs()
            + (self.y as i64 - other.y as i64).unsigned_abs()
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Errors raised by grid access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// The coordinate lies outside the grid. Reaching this on valid input
    /// is a logic error in the caller.
    #[error("BUG: coordinates ({x}, {y}) are out of bounds")]
    OutOfBounds {
        /// Requested column.
        x: i32,
        /// Requested row.
        y: i32,
    },

    /// Width or height is zero or does not fit the address space.
    #[error("invalid grid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// The cell refers to a type missing from the content tables.
    #[error("unknown cell type {0:?}")]
    UnknownCellType(CellTypeId),
}

/// Sparse entry used when a grid is transferred as a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEntry {
    /// Position of the occupied slot.
    pub pos: GridPos,
    /// The cell stored there.
    pub cell: CellInstance,
}

/// Fixed `width × height` store of optional cells.
#[derive(Clone)]
pub struct Grid {
    width: u32,
    height: u32,
    slots: Vec<Option<CellInstance>>,
    content: Arc<ContentTables>,
}

impl Grid {
    /// Creates an empty grid.
    pub fn new(width: u32, height: u32, content: Arc<ContentTables>) -> Result<Self, GridError> {
        let invalid = GridError::InvalidDimensions { width, height };
        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(invalid);
        }
        let len = (width as usize).checked_mul(height as usize).ok_or(invalid)?;
        Ok(Self {
            width,
            height,
            slots: vec![None; len],
            content,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The content tables this grid validates cells against.
    pub fn content(&self) -> &Arc<ContentTables> {
        &self.content
    }

    /// Returns `true` iff `0 <= x < width` and `0 <= y < height`.
    pub fn is_valid_position(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Row-major slot index of a valid coordinate.
    fn index(&self, x: i32, y: i32) -> Result<usize, GridError> {
        if !self.is_valid_position(x, y) {
            return Err(GridError::OutOfBounds { x, y });
        }
        Ok(y as usize * self.width as usize + x as usize)
    }

    /// Returns the cell at `(x, y)`, if any.
    pub fn get(&self, x: i32, y: i32) -> Result<Option<&CellInstance>, GridError> {
        let index = self.index(x, y)?;
        Ok(self.slots[index].as_ref())
    }

    /// Replaces the slot at `(x, y)` and returns the previous content.
    pub fn set(
        &mut self,
        x: i32,
        y: i32,
        cell: Option<CellInstance>,
    ) -> Result<Option<CellInstance>, GridError> {
        let index = self.index(x, y)?;
        if let Some(cell) = cell
            && self.content.cells.lookup(cell.cell_type()).is_none()
        {
            return Err(GridError::UnknownCellType(cell.cell_type()));
        }
        Ok(std::mem::replace(&mut self.slots[index], cell))
    }

    /// Returns `true` if a player could stand on `(x, y)`: the position is
    /// valid and no obstructing cell occupies it.
    pub fn is_free(&self, x: i32, y: i32) -> bool {
        let Ok(index) = self.index(x, y) else {
            return false;
        };
        match self.slots[index] {
            None => true,
            Some(cell) => self
                .content
                .cells
                .lookup(cell.cell_type())
                .is_some_and(|def| !def.obstructs),
        }
    }

    /// Iterates over occupied slots in row-major order.
    pub fn occupied(&self) -> impl Iterator<Item = CellEntry> + '_ {
        let width = self.width as usize;
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            slot.map(|cell| CellEntry {
                pos: GridPos::new((i % width) as i32, (i / width) as i32),
                cell,
            })
        })
    }

    /// Sparse list of occupied slots.
    pub fn to_entries(&self) -> Vec<CellEntry> {
        self.occupied().collect()
    }

    /// Builds a grid from dimensions plus a sparse list of occupied slots.
    pub fn from_entries(
        width: u32,
        height: u32,
        entries: &[CellEntry],
        content: Arc<ContentTables>,
    ) -> Result<Self, GridError> {
        let mut grid = Self::new(width, height, content)?;
        for entry in entries {
            grid.set(entry.pos.x, entry.pos.y, Some(entry.cell))?;
        }
        Ok(grid)
    }
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.slots == other.slots
    }
}

impl Eq for Grid {}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("occupied", &self.occupied().count())
            .finish()
    }
}
