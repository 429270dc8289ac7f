//! Emberfall Grid -- spatial data structures for a single game zone.
//!
//! Everything in this crate is synchronous and owned by one caller at a time,
//! with the exception of [`pool::SolverPool`], which is built for concurrent
//! checkout. The simulation crate layers actors and timers on top.
//!
//! - [`geom`]: integer grid positions and half-open rectangles.
//! - [`aoi`]: the cell-partitioned interest index ("who is near whom").
//! - [`walk`]: the static walkability grid decoded from a map resource.
//! - [`path`]: A* search and the per-owner result cache.
//! - [`pool`]: a lock-free pool of reusable solvers shared by a zone.
//! - [`patrol`]: precomputed patrol routes loaded at zone start.
//!
//! # Quick Start
//!
//! ```
//! use emberfall_grid::prelude::*;
//! use std::sync::Arc;
//!
//! let grid = Arc::new(WalkGrid::open(16, 16));
//! let mut finder = PathFinder::new(grid);
//! let path = finder.find_path(GridPos::new(0, 0), GridPos::new(5, 3)).unwrap();
//! assert_eq!(path.steps.first(), Some(&GridPos::new(0, 0)));
//! assert_eq!(path.steps.last(), Some(&GridPos::new(5, 3)));
//! ```

#![deny(unsafe_code)]

pub mod aoi;
pub mod geom;
pub mod path;
pub mod patrol;
pub mod pool;
pub mod walk;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while decoding zone resources or sampling the walk grid.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// The map resource ended before its header was complete.
    #[error("map resource too short for header: {len} bytes")]
    MapHeader { len: usize },

    /// The map body does not hold `cols * rows` cells.
    #[error("map resource holds {actual} cells, header declares {cols}x{rows}")]
    MapTruncated {
        cols: u16,
        rows: u16,
        actual: usize,
    },

    /// A cell buffer handed to [`walk::WalkGrid::from_cells`] has the wrong length.
    #[error("cell buffer has {actual} entries, expected {expected}")]
    CellCount { expected: usize, actual: usize },

    /// A patrol resource could not be parsed.
    #[error("failed to decode patrol routes: {details}")]
    PatrolDecode { details: String },

    /// A patrol route carries no legs, so it has no starting point.
    #[error("patrol route {id} has no legs")]
    EmptyPatrolRoute { id: i64 },

    /// Random sampling gave up after the configured number of attempts.
    #[error("no walkable cell found in {rect} after {attempts} attempts")]
    NoWalkablePoint { rect: geom::Rect, attempts: u32 },
}

/// Errors produced by path searches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Start or end lies outside the walk grid.
    #[error("position {pos} is outside the {cols}x{rows} grid")]
    OutOfBounds { pos: geom::GridPos, cols: u16, rows: u16 },

    /// No walkable route connects the two cells.
    #[error("no path from {from} to {to}")]
    NoPath {
        from: geom::GridPos,
        to: geom::GridPos,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::aoi::SpatialIndex;
    pub use crate::geom::{Coord, GridPos, Rect, Vec3};
    pub use crate::path::{AStar, PathFinder, PathResult};
    pub use crate::patrol::{PatrolLeg, PatrolRoute};
    pub use crate::pool::{PooledSolver, SolverPool};
    pub use crate::walk::WalkGrid;
    pub use crate::{GridError, PathError};
}
