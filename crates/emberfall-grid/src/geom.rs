//! Integer geometry on the zone grid.
//!
//! Positions are cell coordinates. [`Rect`] is half-open: a rectangle at
//! `(x, y)` with size `w x h` covers `x..x + w` and `y..y + h`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single grid coordinate component.
pub type Coord = i32;

// ---------------------------------------------------------------------------
// GridPos
// ---------------------------------------------------------------------------

/// A cell on the zone plane.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GridPos {
    pub x: Coord,
    pub y: Coord,
}

impl GridPos {
    #[inline]
    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Chessboard distance: the larger of the two axis deltas.
    #[inline]
    pub fn chebyshev(self, other: GridPos) -> Coord {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    /// Straight-line distance.
    #[inline]
    pub fn distance(self, other: GridPos) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Pack into a `u64` for lock-free publication.
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.x as u32) << 32) | u64::from(self.y as u32)
    }

    /// Inverse of [`GridPos::to_bits`].
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            x: (bits >> 32) as u32 as i32,
            y: bits as u32 as i32,
        }
    }
}

impl fmt::Debug for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Vec3
// ---------------------------------------------------------------------------

/// A position with height. The simulation works on `x`/`y`; `z` is carried
/// through for clients and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: Coord,
    pub y: Coord,
    pub z: Coord,
}

impl Vec3 {
    pub const fn new(x: Coord, y: Coord, z: Coord) -> Self {
        Self { x, y, z }
    }

    pub fn grid(self) -> GridPos {
        GridPos::new(self.x, self.y)
    }

    pub fn with_grid(self, pos: GridPos) -> Self {
        Self {
            x: pos.x,
            y: pos.y,
            z: self.z,
        }
    }
}

// ---------------------------------------------------------------------------
// Rect
// ---------------------------------------------------------------------------

/// An axis-aligned, half-open rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: Coord,
    pub y: Coord,
    pub width: Coord,
    pub height: Coord,
}

impl Rect {
    pub const fn new(x: Coord, y: Coord, width: Coord, height: Coord) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle spanning `center +- (half_w, half_h)`, with the origin
    /// clamped to zero. Clamping moves the origin without growing the size,
    /// matching how screen and leash rectangles are built near the map edge.
    pub fn around(center: GridPos, half_w: Coord, half_h: Coord) -> Self {
        Self {
            x: (center.x - half_w).max(0),
            y: (center.y - half_h).max(0),
            width: 2 * half_w,
            height: 2 * half_h,
        }
    }

    #[inline]
    pub fn right(&self) -> Coord {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> Coord {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    #[inline]
    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x >= self.x && pos.x < self.right() && pos.y >= self.y && pos.y < self.bottom()
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        !self.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Pack into a `u64` as four `u16` lanes. Coordinates are saturated into
    /// the `u16` range, which covers every map a `u16` header can describe.
    pub fn to_bits(&self) -> u64 {
        let lane = |v: Coord| u64::from(v.clamp(0, i32::from(u16::MAX)) as u16);
        (lane(self.x) << 48) | (lane(self.y) << 32) | (lane(self.width) << 16) | lane(self.height)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            x: Coord::from((bits >> 48) as u16),
            y: Coord::from((bits >> 32) as u16),
            width: Coord::from((bits >> 16) as u16),
            height: Coord::from(bits as u16),
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}; {}x{}]",
            self.x, self.y, self.width, self.height
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chebyshev_takes_larger_axis() {
        let a = GridPos::new(3, 10);
        let b = GridPos::new(7, 4);
        assert_eq!(a.chebyshev(b), 6);
        assert_eq!(b.chebyshev(a), 6);
    }

    #[test]
    fn rect_is_half_open() {
        let r = Rect::new(0, 0, 100, 100);
        assert!(r.contains(GridPos::new(0, 0)));
        assert!(r.contains(GridPos::new(99, 99)));
        assert!(!r.contains(GridPos::new(100, 50)));
        assert!(!r.contains(GridPos::new(-1, 50)));
    }

    #[test]
    fn around_clamps_origin_at_zero() {
        let r = Rect::around(GridPos::new(5, 50), 30, 30);
        assert_eq!(r, Rect::new(0, 20, 60, 60));
    }

    #[test]
    fn contains_rect_requires_full_cover() {
        let outer = Rect::new(0, 0, 80, 80);
        assert!(outer.contains_rect(&Rect::new(10, 10, 60, 60)));
        assert!(!outer.contains_rect(&Rect::new(30, 30, 60, 60)));
        assert!(!Rect::default().contains_rect(&Rect::default()));
    }

    #[test]
    fn packing_preserves_values() {
        let pos = GridPos::new(-4, 1200);
        assert_eq!(GridPos::from_bits(pos.to_bits()), pos);

        let rect = Rect::new(12, 340, 80, 80);
        assert_eq!(Rect::from_bits(rect.to_bits()), rect);
    }
}
