//! Static walkability grid.
//!
//! The map resource is big-endian: a `u16` column count, a `u16` row count,
//! then `rows * cols` single-byte cells in row-major order. In the resource a
//! zero byte is open ground and any other byte is a wall. In memory the
//! meaning flips: a cell value of `0` is blocked and non-zero is walkable, so
//! the search code can treat the cell value as "passable" directly.

use rand::Rng;

use crate::geom::{Coord, GridPos, Rect};
use crate::GridError;

const WALKABLE: u8 = 1;
const BLOCKED: u8 = 0;

// ---------------------------------------------------------------------------
// WalkGrid
// ---------------------------------------------------------------------------

/// Immutable walkability data for one zone map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkGrid {
    cols: u16,
    rows: u16,
    cells: Vec<u8>,
}

impl WalkGrid {
    /// Decode a map resource.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GridError> {
        if bytes.len() < 4 {
            return Err(GridError::MapHeader { len: bytes.len() });
        }
        let cols = u16::from_be_bytes([bytes[0], bytes[1]]);
        let rows = u16::from_be_bytes([bytes[2], bytes[3]]);
        let body = &bytes[4..];
        let expected = usize::from(cols) * usize::from(rows);
        if body.len() < expected {
            return Err(GridError::MapTruncated {
                cols,
                rows,
                actual: body.len(),
            });
        }
        let cells = body[..expected]
            .iter()
            .map(|&b| if b == 0 { WALKABLE } else { BLOCKED })
            .collect();
        Ok(Self { cols, rows, cells })
    }

    /// Encode back into the resource layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.cells.len());
        out.extend_from_slice(&self.cols.to_be_bytes());
        out.extend_from_slice(&self.rows.to_be_bytes());
        out.extend(self.cells.iter().map(|&c| if c == BLOCKED { 1 } else { 0 }));
        out
    }

    /// Build from in-memory cells (`0` = blocked, non-zero = walkable).
    pub fn from_cells(cols: u16, rows: u16, cells: Vec<u8>) -> Result<Self, GridError> {
        let expected = usize::from(cols) * usize::from(rows);
        if cells.len() != expected {
            return Err(GridError::CellCount {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self { cols, rows, cells })
    }

    /// A grid with every cell walkable.
    pub fn open(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            cells: vec![WALKABLE; usize::from(cols) * usize::from(rows)],
        }
    }

    /// Parse an ASCII picture where `#` marks a wall. Handy for fixtures.
    pub fn from_ascii(rows: &[&str]) -> Self {
        let cols = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        let mut cells = Vec::with_capacity(cols * rows.len());
        for row in rows {
            let bytes = row.as_bytes();
            for x in 0..cols {
                let wall = bytes.get(x).copied() == Some(b'#');
                cells.push(if wall { BLOCKED } else { WALKABLE });
            }
        }
        Self {
            cols: cols as u16,
            rows: rows.len() as u16,
            cells,
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    #[inline]
    pub fn in_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < Coord::from(self.cols) && pos.y < Coord::from(self.rows)
    }

    /// Row-major index of an in-bounds cell.
    #[inline]
    pub fn index_of(&self, pos: GridPos) -> usize {
        pos.y as usize * usize::from(self.cols) + pos.x as usize
    }

    #[inline]
    pub fn pos_of(&self, index: usize) -> GridPos {
        let cols = usize::from(self.cols);
        GridPos::new((index % cols) as Coord, (index / cols) as Coord)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Out-of-bounds cells are never walkable.
    #[inline]
    pub fn is_walkable(&self, pos: GridPos) -> bool {
        self.in_bounds(pos) && self.cells[self.index_of(pos)] != BLOCKED
    }

    /// Sample a walkable cell inside `rect`, trying at most `attempts` times.
    ///
    /// Each attempt draws a uniform cell from the rectangle (coordinates
    /// clamped at zero). The attempt bound is exact: the search never draws
    /// more than `attempts` candidates.
    pub fn random_walkable<R: Rng + ?Sized>(
        &self,
        rect: Rect,
        attempts: u32,
        rng: &mut R,
    ) -> Result<GridPos, GridError> {
        if !rect.is_empty() {
            for _ in 0..attempts {
                let x = rng.gen_range(rect.x..rect.right()).max(0);
                let y = rng.gen_range(rect.y..rect.bottom()).max(0);
                let candidate = GridPos::new(x, y);
                if self.is_walkable(candidate) {
                    return Ok(candidate);
                }
            }
        }
        Err(GridError::NoWalkablePoint { rect, attempts })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
