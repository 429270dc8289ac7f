//! Grid path search.
//!
//! [`AStar`] is an 8-connected A* over a [`WalkGrid`] with octile costs
//! (10 straight, 14 diagonal). Diagonal steps may not cut a wall corner: both
//! orthogonal neighbours must be walkable. Ties in the open list break on the
//! heuristic and then on the cell index, so the same query always yields the
//! same path.
//!
//! The solver keeps its scratch buffers between searches and invalidates them
//! by bumping a generation counter, which makes [`AStar::reset`] O(1).
//!
//! [`PathFinder`] wraps a solver with an unbounded `(start, end)` cache. It is
//! meant for one owner that issues every request from its own task queue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::geom::{Coord, GridPos};
use crate::walk::WalkGrid;
use crate::PathError;

const STRAIGHT: u32 = 10;
const DIAGONAL: u32 = 14;

const NEIGHBOURS: [(Coord, Coord); 8] = [
    (0, -1),
    (1, 0),
    (0, 1),
    (-1, 0),
    (1, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
];

// ---------------------------------------------------------------------------
// PathResult
// ---------------------------------------------------------------------------

/// A found path plus search metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResult {
    /// Every cell from start to end, inclusive.
    pub steps: Arc<[GridPos]>,
    /// Blocked or corner-cut neighbours rejected during the search.
    pub blocked: usize,
    /// Direction changes along the path.
    pub turns: usize,
}

impl PathResult {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AStar
// ---------------------------------------------------------------------------

/// Reusable A* solver bound to one walk grid.
#[derive(Debug)]
pub struct AStar {
    grid: Arc<WalkGrid>,
    generation: u32,
    /// Generation at which a cell was last opened.
    opened: Vec<u32>,
    /// Generation at which a cell was last closed.
    closed: Vec<u32>,
    cost: Vec<u32>,
    parent: Vec<u32>,
    open: BinaryHeap<Reverse<(u32, u32, u32)>>,
}

impl AStar {
    pub fn new(grid: Arc<WalkGrid>) -> Self {
        let n = grid.len();
        Self {
            grid,
            generation: 1,
            opened: vec![0; n],
            closed: vec![0; n],
            cost: vec![0; n],
            parent: vec![0; n],
            open: BinaryHeap::new(),
        }
    }

    pub fn grid(&self) -> &Arc<WalkGrid> {
        &self.grid
    }

    /// Forget all state from the previous search.
    pub fn reset(&mut self) {
        self.open.clear();
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.opened.iter_mut().for_each(|g| *g = 0);
            self.closed.iter_mut().for_each(|g| *g = 0);
            self.generation = 1;
        }
    }

    fn heuristic(a: GridPos, b: GridPos) -> u32 {
        let dx = (a.x - b.x).unsigned_abs();
        let dy = (a.y - b.y).unsigned_abs();
        let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
        DIAGONAL * lo + STRAIGHT * (hi - lo)
    }

    fn check_bounds(&self, pos: GridPos) -> Result<(), PathError> {
        if self.grid.in_bounds(pos) {
            Ok(())
        } else {
            Err(PathError::OutOfBounds {
                pos,
                cols: self.grid.cols(),
                rows: self.grid.rows(),
            })
        }
    }

    /// Search from `start` to `end`.
    ///
    /// The start cell itself need not be walkable (an actor may be standing on
    /// a cell that was placed by hand); the end cell must be.
    pub fn find_path(&mut self, start: GridPos, end: GridPos) -> Result<PathResult, PathError> {
        self.check_bounds(start)?;
        self.check_bounds(end)?;
        self.reset();

        if !self.grid.is_walkable(end) {
            return Err(PathError::NoPath {
                from: start,
                to: end,
            });
        }
        if start == end {
            return Ok(PathResult {
                steps: Arc::from(vec![start]),
                blocked: 0,
                turns: 0,
            });
        }

        let generation = self.generation;
        let start_idx = self.grid.index_of(start);
        let end_idx = self.grid.index_of(end);
        self.opened[start_idx] = generation;
        self.cost[start_idx] = 0;
        self.parent[start_idx] = start_idx as u32;
        let h = Self::heuristic(start, end);
        self.open.push(Reverse((h, h, start_idx as u32)));

        let mut blocked = 0usize;
        while let Some(Reverse((_, _, idx))) = self.open.pop() {
            let idx = idx as usize;
            if self.closed[idx] == generation {
                continue;
            }
            self.closed[idx] = generation;
            if idx == end_idx {
                return Ok(self.rebuild(start_idx, end_idx, blocked));
            }

            let here = self.grid.pos_of(idx);
            for (dx, dy) in NEIGHBOURS {
                let next = GridPos::new(here.x + dx, here.y + dy);
                if !self.grid.in_bounds(next) {
                    continue;
                }
                let diagonal = dx != 0 && dy != 0;
                let corner_cut = diagonal
                    && (!self.grid.is_walkable(GridPos::new(here.x + dx, here.y))
                        || !self.grid.is_walkable(GridPos::new(here.x, here.y + dy)));
                if !self.grid.is_walkable(next) || corner_cut {
                    blocked += 1;
                    continue;
                }
                let next_idx = self.grid.index_of(next);
                if self.closed[next_idx] == generation {
                    continue;
                }
                let step = if diagonal { DIAGONAL } else { STRAIGHT };
                let g = self.cost[idx] + step;
                if self.opened[next_idx] != generation || g < self.cost[next_idx] {
                    self.opened[next_idx] = generation;
                    self.cost[next_idx] = g;
                    self.parent[next_idx] = idx as u32;
                    let h = Self::heuristic(next, end);
                    self.open.push(Reverse((g + h, h, next_idx as u32)));
                }
            }
        }

        Err(PathError::NoPath {
            from: start,
            to: end,
        })
    }

    fn rebuild(&self, start_idx: usize, end_idx: usize, blocked: usize) -> PathResult {
        let mut steps = vec![self.grid.pos_of(end_idx)];
        let mut idx = end_idx;
        while idx != start_idx {
            idx = self.parent[idx] as usize;
            steps.push(self.grid.pos_of(idx));
        }
        steps.reverse();

        let turns = steps
            .windows(3)
            .filter(|w| {
                let a = (w[1].x - w[0].x, w[1].y - w[0].y);
                let b = (w[2].x - w[1].x, w[2].y - w[1].y);
                a != b
            })
            .count();

        PathResult {
            steps: Arc::from(steps),
            blocked,
            turns,
        }
    }
}

// ---------------------------------------------------------------------------
// PathFinder
// ---------------------------------------------------------------------------

/// A private solver with a result cache keyed by `(start, end)`.
///
/// Single writer: the owner must not share it across tasks. Failed searches
/// are not cached.
#[derive(Debug)]
pub struct PathFinder {
    solver: AStar,
    cache: HashMap<(GridPos, GridPos), PathResult>,
    hits: u64,
}

impl PathFinder {
    pub fn new(grid: Arc<WalkGrid>) -> Self {
        Self {
            solver: AStar::new(grid),
            cache: HashMap::new(),
            hits: 0,
        }
    }

    /// Return the cached path for `(start, end)` verbatim, or search and cache.
    pub fn find_path(&mut self, start: GridPos, end: GridPos) -> Result<PathResult, PathError> {
        if let Some(hit) = self.cache.get(&(start, end)) {
            self.hits += 1;
            return Ok(hit.clone());
        }
        let found = self.solver.find_path(start, end)?;
        self.cache.insert((start, end), found.clone());
        Ok(found)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn grid(&self) -> &Arc<WalkGrid> {
        self.solver.grid()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn maze() -> Arc<WalkGrid> {
        Arc::new(WalkGrid::from_ascii(&[
            "..........",
            ".########.",
            ".#......#.",
            ".#.####.#.",
            "...#..#...",
            "####..####",
        ]))
    }

    fn assert_connected(steps: &[GridPos], grid: &WalkGrid) {
        for pair in steps.windows(2) {
            assert_eq!(pair[0].chebyshev(pair[1]), 1, "non-adjacent steps {pair:?}");
            assert!(grid.is_walkable(pair[1]));
        }
    }

    #[test]
    fn straight_line_on_open_grid() {
        let grid = Arc::new(WalkGrid::open(10, 10));
        let mut astar = AStar::new(grid);
        let path = astar.find_path(GridPos::new(0, 0), GridPos::new(6, 0)).unwrap();
        assert_eq!(path.len(), 7);
        assert_eq!(path.turns, 0);
    }

    #[test]
    fn diagonal_moves_are_used() {
        let grid = Arc::new(WalkGrid::open(10, 10));
        let mut astar = AStar::new(grid);
        let path = astar.find_path(GridPos::new(0, 0), GridPos::new(4, 4)).unwrap();
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn routes_around_walls() {
        let grid = maze();
        let mut astar = AStar::new(grid.clone());
        let path = astar.find_path(GridPos::new(0, 0), GridPos::new(2, 2)).unwrap();
        assert_eq!(path.steps.first(), Some(&GridPos::new(0, 0)));
        assert_eq!(path.steps.last(), Some(&GridPos::new(2, 2)));
        assert_connected(&path.steps, &grid);
        assert!(path.turns > 0);
        assert!(path.blocked > 0);
    }

    #[test]
    fn never_cuts_corners() {
        let grid = Arc::new(WalkGrid::from_ascii(&["..", "#."]));
        let mut astar = AStar::new(grid);
        let path = astar.find_path(GridPos::new(0, 0), GridPos::new(1, 1)).unwrap();
        assert_eq!(
            path.steps.to_vec(),
            vec![GridPos::new(0, 0), GridPos::new(1, 0), GridPos::new(1, 1)]
        );
    }

    #[test]
    fn enclosed_target_has_no_path() {
        let grid = Arc::new(WalkGrid::from_ascii(&[".....", ".###.", ".#.#.", ".###."]));
        let mut astar = AStar::new(grid);
        let err = astar
            .find_path(GridPos::new(0, 0), GridPos::new(2, 2))
            .unwrap_err();
        assert_eq!(
            err,
            PathError::NoPath {
                from: GridPos::new(0, 0),
                to: GridPos::new(2, 2)
            }
        );
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let mut astar = AStar::new(Arc::new(WalkGrid::open(4, 4)));
        assert!(matches!(
            astar.find_path(GridPos::new(0, 0), GridPos::new(4, 0)),
            Err(PathError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn solver_is_reusable_after_failure() {
        let grid = maze();
        let mut astar = AStar::new(grid);
        assert!(astar.find_path(GridPos::new(0, 0), GridPos::new(1, 1)).is_err());
        let a = astar.find_path(GridPos::new(0, 0), GridPos::new(9, 4)).unwrap();
        astar.reset();
        let b = astar.find_path(GridPos::new(0, 0), GridPos::new(9, 4)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cache_hit_returns_identical_allocation() {
        let mut finder = PathFinder::new(maze());
        let first = finder.find_path(GridPos::new(0, 0), GridPos::new(9, 4)).unwrap();
        let second = finder.find_path(GridPos::new(0, 0), GridPos::new(9, 4)).unwrap();
        assert!(Arc::ptr_eq(&first.steps, &second.steps));
        assert_eq!(first, second);
        assert_eq!(finder.hits(), 1);
        assert_eq!(finder.cached(), 1);
    }

    #[test]
    fn failures_are_not_cached() {
        let mut finder = PathFinder::new(maze());
        assert!(finder.find_path(GridPos::new(0, 0), GridPos::new(1, 1)).is_err());
        assert_eq!(finder.cached(), 0);
    }
}
