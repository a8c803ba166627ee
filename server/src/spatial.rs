//! Tile-keyed occupancy index
//!
//! Maps every tile to the ids currently standing on it, in insertion order.
//! The world pairs each coordinate change with a call here so lookups never
//! see stale positions.

use crate::entity::{EntityId, Tile};

#[derive(Debug, Clone)]
pub struct SpatialIndex {
    width: i32,
    height: i32,
    cells: Vec<Vec<EntityId>>,
}

impl SpatialIndex {
    pub fn new(width: i32, height: i32) -> Self {
        let len = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            cells: vec![Vec::new(); len],
        }
    }

    pub fn in_bounds(&self, tile: Tile) -> bool {
        tile.x >= 0 && tile.y >= 0 && tile.x < self.width && tile.y < self.height
    }

    fn cell(&self, tile: Tile) -> Option<usize> {
        self.in_bounds(tile)
            .then(|| (tile.y * self.width + tile.x) as usize)
    }

    /// Returns false when the tile is outside the grid.
    pub fn add(&mut self, id: EntityId, tile: Tile) -> bool {
        match self.cell(tile) {
            Some(index) => {
                let cell = &mut self.cells[index];
                if !cell.contains(&id) {
                    cell.push(id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: EntityId, tile: Tile) -> bool {
        match self.cell(tile) {
            Some(index) => {
                let cell = &mut self.cells[index];
                let before = cell.len();
                cell.retain(|occupant| *occupant != id);
                cell.len() != before
            }
            None => false,
        }
    }

    pub fn move_entity(&mut self, id: EntityId, from: Tile, to: Tile) {
        self.remove(id, from);
        self.add(id, to);
    }

    pub fn occupants(&self, tile: Tile) -> &[EntityId] {
        match self.cell(tile) {
            Some(index) => &self.cells[index],
            None => &[],
        }
    }

    /// All (tile, id) pairs, row-major.
    pub fn entries(&self) -> impl Iterator<Item = (Tile, EntityId)> + '_ {
        let width = self.width;
        self.cells.iter().enumerate().flat_map(move |(index, ids)| {
            let tile = Tile::new(index as i32 % width, index as i32 / width);
            ids.iter().map(move |id| (tile, *id))
        })
    }

    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }
}
