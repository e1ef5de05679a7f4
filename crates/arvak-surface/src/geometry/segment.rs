//! Segments: rectangles of the grid with a state and four adjacency sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a segment inside a [`SegmentSet`](super::SegmentSet).
///
/// Ids are never reused; an edit that replaces a segment hands out fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u32);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Index of a placed extern instance in the [`Qcb`](super::Qcb).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternHandle(pub u32);

impl fmt::Display for ExternHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// A grid cell. Row 0 is the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub y: u32,
    pub x: u32,
}

impl Coord {
    /// Create a coordinate.
    pub const fn new(y: u32, x: u32) -> Self {
        Self { y, x }
    }

    /// Manhattan distance.
    pub fn manhattan(self, other: Coord) -> u32 {
        self.y.abs_diff(other.y) + self.x.abs_diff(other.x)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.y, self.x)
    }
}

/// Axis-aligned rectangle with half-open upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub y0: u32,
    pub x0: u32,
    pub y1: u32,
    pub x1: u32,
}

impl Rect {
    /// Rectangle with top-left corner `(y, x)` and size `h x w`.
    pub const fn new(y: u32, x: u32, h: u32, w: u32) -> Self {
        Self {
            y0: y,
            x0: x,
            y1: y + h,
            x1: x + w,
        }
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.y0 >= self.y1 || self.x0 >= self.x1
    }

    /// Whether the cell lies inside.
    #[inline]
    pub fn contains(&self, c: Coord) -> bool {
        c.y >= self.y0 && c.y < self.y1 && c.x >= self.x0 && c.x < self.x1
    }

    /// Whether `other` lies entirely inside.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.y0 >= self.y0 && other.y1 <= self.y1 && other.x0 >= self.x0 && other.x1 <= self.x1
    }

    /// Overlap of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            y0: self.y0.max(other.y0),
            x0: self.x0.max(other.x0),
            y1: self.y1.min(other.y1),
            x1: self.x1.min(other.x1),
        };
        (!r.is_empty()).then_some(r)
    }

    /// Where `other` touches this rectangle edge to edge, seen from `self`.
    pub fn touching_side(&self, other: &Rect) -> Option<Side> {
        let rows = self.y0.max(other.y0) < self.y1.min(other.y1);
        let cols = self.x0.max(other.x0) < self.x1.min(other.x1);
        if cols && other.y1 == self.y0 {
            Some(Side::Above)
        } else if cols && other.y0 == self.y1 {
            Some(Side::Below)
        } else if rows && other.x1 == self.x0 {
            Some(Side::Left)
        } else if rows && other.x0 == self.x1 {
            Some(Side::Right)
        } else {
            None
        }
    }

    /// Pieces of `self` left over after cutting out `inner`: top band, bottom
    /// band, then the left and right parts of the middle band.
    ///
    /// `inner` must lie inside `self`.
    pub fn remainder(&self, inner: &Rect) -> Vec<Rect> {
        let candidates = [
            Rect {
                y0: self.y0,
                x0: self.x0,
                y1: inner.y0,
                x1: self.x1,
            },
            Rect {
                y0: inner.y1,
                x0: self.x0,
                y1: self.y1,
                x1: self.x1,
            },
            Rect {
                y0: inner.y0,
                x0: self.x0,
                y1: inner.y1,
                x1: inner.x0,
            },
            Rect {
                y0: inner.y0,
                x0: inner.x1,
                y1: inner.y1,
                x1: self.x1,
            },
        ];
        candidates.into_iter().filter(|r| !r.is_empty()).collect()
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Coord> + '_ {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| Coord::new(y, x)))
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}, {}..{}]",
            self.y0, self.y1, self.x0, self.x1
        )
    }
}

/// One of the four adjacency directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Above,
    Below,
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Above, Side::Below, Side::Left, Side::Right];

    /// The side as seen from the neighbour.
    pub fn opposite(self) -> Side {
        match self {
            Side::Above => Side::Below,
            Side::Below => Side::Above,
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Whether the side is above or below.
    pub fn is_vertical(self) -> bool {
        matches!(self, Side::Above | Side::Below)
    }
}

/// What a segment is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    /// Free space.
    Unallocated,
    /// Data qubit patches.
    Register,
    /// Shared routing channel.
    Route,
    /// Routing reserved for one extern block.
    LocalRoute,
    /// I/O patches.
    Io,
    /// An extern factory instance.
    Extern(ExternHandle),
    /// Transient filler while a layout is being built.
    Intermediary,
}

impl SegmentState {
    /// Whether paths may run through the segment.
    #[inline]
    pub fn is_route(self) -> bool {
        matches!(self, SegmentState::Route | SegmentState::LocalRoute)
    }

    /// Whether the segment hosts operand patches.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SegmentState::Register | SegmentState::Io | SegmentState::Extern(_)
        )
    }

    /// Single-character rendering used by [`Qcb::render`](super::Qcb::render).
    pub fn glyph(self) -> char {
        match self {
            SegmentState::Unallocated => '.',
            SegmentState::Register => 'R',
            SegmentState::Route => '#',
            SegmentState::LocalRoute => '+',
            SegmentState::Io => 'I',
            SegmentState::Extern(_) => 'X',
            SegmentState::Intermediary => '?',
        }
    }
}

/// A rectangle of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    pub rect: Rect,
    pub allocated: bool,
    pub state: SegmentState,
    pub above: BTreeSet<SegmentId>,
    pub below: BTreeSet<SegmentId>,
    pub left: BTreeSet<SegmentId>,
    pub right: BTreeSet<SegmentId>,
}

impl Segment {
    pub(crate) fn new(id: SegmentId, rect: Rect, state: SegmentState, allocated: bool) -> Self {
        Self {
            id,
            rect,
            allocated,
            state,
            above: BTreeSet::new(),
            below: BTreeSet::new(),
            left: BTreeSet::new(),
            right: BTreeSet::new(),
        }
    }

    /// Neighbours on one side.
    pub fn neighbours(&self, side: Side) -> &BTreeSet<SegmentId> {
        match side {
            Side::Above => &self.above,
            Side::Below => &self.below,
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub(crate) fn neighbours_mut(&mut self, side: Side) -> &mut BTreeSet<SegmentId> {
        match side {
            Side::Above => &mut self.above,
            Side::Below => &mut self.below,
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// All neighbours with the side they sit on.
    pub fn all_neighbours(&self) -> impl Iterator<Item = (Side, SegmentId)> + '_ {
        Side::ALL
            .into_iter()
            .flat_map(move |side| self.neighbours(side).iter().map(move |&id| (side, id)))
    }

    /// Whether the segment is free space.
    #[inline]
    pub fn is_free(&self) -> bool {
        !self.allocated && self.state == SegmentState::Unallocated
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.rect.height()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.rect.width()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_side() {
        let a = Rect::new(2, 2, 2, 2);
        assert_eq!(a.touching_side(&Rect::new(0, 3, 2, 4)), Some(Side::Above));
        assert_eq!(a.touching_side(&Rect::new(4, 0, 1, 3)), Some(Side::Below));
        assert_eq!(a.touching_side(&Rect::new(3, 0, 5, 2)), Some(Side::Left));
        assert_eq!(a.touching_side(&Rect::new(2, 4, 1, 1)), Some(Side::Right));
        // corner contact is not adjacency
        assert_eq!(a.touching_side(&Rect::new(0, 0, 2, 2)), None);
    }

    #[test]
    fn test_remainder_tiles_outer() {
        let outer = Rect::new(0, 0, 5, 6);
        let inner = Rect::new(1, 2, 2, 3);
        let rest = outer.remainder(&inner);
        assert_eq!(rest.len(), 4);
        let total: u64 = rest.iter().map(Rect::area).sum::<u64>() + inner.area();
        assert_eq!(total, outer.area());
        assert!(rest.iter().all(|r| r.intersection(&inner).is_none()));
    }

    #[test]
    fn test_cells_row_major() {
        let cells: Vec<_> = Rect::new(1, 1, 2, 2).cells().collect();
        assert_eq!(
            cells,
            vec![
                Coord::new(1, 1),
                Coord::new(1, 2),
                Coord::new(2, 1),
                Coord::new(2, 2)
            ]
        );
    }
}
