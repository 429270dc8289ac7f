//! Cell-partitioned area-of-interest index.
//!
//! The zone plane is cut into square cells of a fixed size. Every occupant is
//! stored in exactly one cell, and [`SpatialIndex::search`] returns everything
//! in the 3x3 block of cells around a point. The result is a coarse
//! pre-filter: callers run their own rectangle or range test on it.
//!
//! The index also remembers which cell each key lives in, so removing a key
//! never depends on the caller still knowing the exact position it was
//! inserted at.
//!
//! # Example
//!
//! ```
//! use emberfall_grid::aoi::SpatialIndex;
//! use emberfall_grid::geom::GridPos;
//!
//! let mut index: SpatialIndex<u64, &str> = SpatialIndex::new(200, 200, 40);
//! index.add(GridPos::new(10, 10), 1, "hero");
//! index.add(GridPos::new(45, 12), 2, "wolf");
//! index.add(GridPos::new(190, 190), 3, "bear");
//!
//! let near: Vec<_> = index.search(GridPos::new(12, 12)).into_iter().collect();
//! assert_eq!(near.len(), 2);
//!
//! index.delete(GridPos::new(10, 10), &1);
//! assert!(!index.contains(&1));
//! ```

use std::collections::HashMap;
use std::hash::Hash;

use crate::geom::{Coord, GridPos};

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

/// Grid-bucketed set membership keyed by `K`, carrying a `V` per occupant.
#[derive(Debug, Clone)]
pub struct SpatialIndex<K, V> {
    cell_size: Coord,
    cols: usize,
    rows: usize,
    cells: Vec<HashMap<K, V>>,
    /// Which cell each key currently occupies.
    placement: HashMap<K, usize>,
}

impl<K, V> SpatialIndex<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    /// Create an index over a `width x height` area split into square cells
    /// of `cell_size`. Sizes below one are raised to one.
    pub fn new(width: Coord, height: Coord, cell_size: Coord) -> Self {
        let cell_size = cell_size.max(1);
        let span = |extent: Coord| (extent.max(1) as usize).div_ceil(cell_size as usize);
        let cols = span(width);
        let rows = span(height);
        let mut cells = Vec::with_capacity(cols * rows);
        cells.resize_with(cols * rows, HashMap::new);
        Self {
            cell_size,
            cols,
            rows,
            cells,
            placement: HashMap::new(),
        }
    }

    /// Number of cells along each axis.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// Number of occupants.
    pub fn len(&self) -> usize {
        self.placement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placement.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.placement.contains_key(key)
    }

    /// The value stored for `key`, wherever it lives.
    pub fn get(&self, key: &K) -> Option<&V> {
        let cell = *self.placement.get(key)?;
        self.cells[cell].get(key)
    }

    /// Cell coordinates for `pos`, clamped onto the edge cells.
    pub fn cell_coords(&self, pos: GridPos) -> (usize, usize) {
        let clamp = |v: Coord, n: usize| -> usize {
            let c = v.max(0) / self.cell_size;
            (c as usize).min(n - 1)
        };
        (clamp(pos.x, self.cols), clamp(pos.y, self.rows))
    }

    fn cell_index(&self, pos: GridPos) -> usize {
        let (cx, cy) = self.cell_coords(pos);
        cy * self.cols + cx
    }

    /// Insert `key` at `pos`. A key that is already present is moved rather
    /// than duplicated.
    pub fn add(&mut self, pos: GridPos, key: K, value: V) {
        let cell = self.cell_index(pos);
        if let Some(old) = self.placement.insert(key, cell) {
            if old != cell {
                self.cells[old].remove(&key);
            }
        }
        self.cells[cell].insert(key, value);
    }

    /// Remove `key`. `pos` is where the caller believes the key lives; the
    /// recorded placement wins when the two disagree.
    pub fn delete(&mut self, pos: GridPos, key: &K) -> Option<V> {
        match self.placement.remove(key) {
            Some(cell) => self.cells[cell].remove(key),
            None => {
                let cell = self.cell_index(pos);
                self.cells[cell].remove(key)
            }
        }
    }

    /// Record a move from `old` to `new`. The entry changes cell only when the
    /// two positions map to different cells; the stored value is refreshed
    /// either way.
    pub fn moved(&mut self, new: GridPos, old: GridPos, key: K, value: V) {
        let target = self.cell_index(new);
        let current = self
            .placement
            .get(&key)
            .copied()
            .unwrap_or_else(|| self.cell_index(old));
        if current != target {
            self.cells[current].remove(&key);
        }
        self.cells[target].insert(key, value);
        self.placement.insert(key, target);
    }

    /// All occupants of the cell containing `pos` and its eight neighbours.
    pub fn search(&self, pos: GridPos) -> Vec<V> {
        let (cx, cy) = self.cell_coords(pos);
        let mut found = Vec::new();
        for y in cy.saturating_sub(1)..=(cy + 1).min(self.rows - 1) {
            for x in cx.saturating_sub(1)..=(cx + 1).min(self.cols - 1) {
                found.extend(self.cells[y * self.cols + x].values().cloned());
            }
        }
        found
    }

    /// Keys currently stored in the cell containing `pos`.
    pub fn keys_in_cell(&self, pos: GridPos) -> Vec<K> {
        self.cells[self.cell_index(pos)].keys().copied().collect()
    }

    /// Iterate every occupant.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.cells.iter().flat_map(|cell| cell.iter())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SpatialIndex<u32, u32> {
        SpatialIndex::new(400, 400, 40)
    }

    #[test]
    fn search_covers_three_by_three_block() {
        let mut idx = index();
        idx.add(GridPos::new(100, 100), 1, 1); // cell (2, 2)
        idx.add(GridPos::new(60, 60), 2, 2); // cell (1, 1)
        idx.add(GridPos::new(150, 150), 3, 3); // cell (3, 3)
        idx.add(GridPos::new(200, 100), 4, 4); // cell (5, 2)

        let mut found = idx.search(GridPos::new(100, 100));
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[test]
    fn search_at_corner_stays_in_bounds() {
        let mut idx = index();
        idx.add(GridPos::new(0, 0), 1, 1);
        idx.add(GridPos::new(399, 399), 2, 2);
        assert_eq!(idx.search(GridPos::new(0, 0)), vec![1]);
        assert_eq!(idx.search(GridPos::new(399, 399)), vec![2]);
    }

    #[test]
    fn positions_outside_area_clamp_to_edge_cells() {
        let mut idx = index();
        idx.add(GridPos::new(-50, 9000), 7, 7);
        assert_eq!(idx.cell_coords(GridPos::new(-50, 9000)), (0, 9));
        assert_eq!(idx.search(GridPos::new(0, 399)), vec![7]);
    }

    #[test]
    fn moved_changes_cell_only_across_boundaries() {
        let mut idx = index();
        idx.add(GridPos::new(5, 5), 1, 10);
        idx.moved(GridPos::new(6, 5), GridPos::new(5, 5), 1, 11);
        assert_eq!(idx.keys_in_cell(GridPos::new(0, 0)), vec![1]);
        assert_eq!(idx.get(&1), Some(&11));

        idx.moved(GridPos::new(300, 300), GridPos::new(6, 5), 1, 12);
        assert!(idx.keys_in_cell(GridPos::new(0, 0)).is_empty());
        assert_eq!(idx.keys_in_cell(GridPos::new(300, 300)), vec![1]);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn delete_with_stale_position_still_removes() {
        let mut idx = index();
        idx.add(GridPos::new(10, 10), 1, 1);
        idx.moved(GridPos::new(390, 390), GridPos::new(10, 10), 1, 1);
        assert_eq!(idx.delete(GridPos::new(10, 10), &1), Some(1));
        assert!(idx.search(GridPos::new(390, 390)).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn re_adding_a_key_never_duplicates_it() {
        let mut idx = index();
        idx.add(GridPos::new(10, 10), 1, 1);
        idx.add(GridPos::new(300, 10), 1, 1);
        assert_eq!(idx.iter().count(), 1);
        assert!(idx.search(GridPos::new(10, 10)).is_empty());
    }
}
