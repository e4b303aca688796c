//! The global border cell cache.
//!
//! Tile meshes read their edge vertex heights through this cache so that a
//! vertex shared by two tiles resolves to the same cell regardless of
//! which tile happened to load first. Keys are world cell coordinates;
//! entries live as long as the owning tile is resident.

use veld_core::FastHashMap;

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct BorderCell {
    pub height: f32,
    pub is_hole: bool,
}

#[derive(Debug, Default)]
pub struct BorderCellCache {
    cells: FastHashMap<(i32, i32), BorderCell>,
}

impl BorderCellCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, world_cx: i32, world_cz: i32, cell: BorderCell) {
        self.cells.insert((world_cx, world_cz), cell);
    }

    pub fn get(&self, world_cx: i32, world_cz: i32) -> Option<BorderCell> {
        self.cells.get(&(world_cx, world_cz)).copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drops every cell of an unloading tile.
    pub fn remove_tile(&mut self, tile_origin_cx: i32, tile_origin_cz: i32, tile_span: i32) {
        for z in 0..tile_span {
            for x in 0..tile_span {
                self.cells.remove(&(tile_origin_cx + x, tile_origin_cz + z));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut cache = BorderCellCache::new();
        cache.insert(5, -3, BorderCell { height: 2.5, is_hole: false });
        assert_eq!(cache.get(5, -3).unwrap().height, 2.5);
        assert!(cache.get(5, -2).is_none());

        cache.remove_tile(0, -32, 32);
        assert!(cache.get(5, -3).is_none());
        assert!(cache.is_empty());
    }
}
