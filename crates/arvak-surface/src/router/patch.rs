//! Cell-level view of a layout with time-extended locks.

use arvak_surface_ir::NodeIndex;
use serde::{Deserialize, Serialize};

use crate::geometry::{Coord, Qcb, SegmentId, SegmentState};

/// Which boundaries of a patch expose its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Reachable from above or below only.
    Vertical,
    /// Reachable from any side.
    Free,
}

/// A cell held by a gate over `[from, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub owner: NodeIndex,
    pub from: u32,
    pub until: u32,
}

impl Lock {
    #[inline]
    fn overlaps(&self, from: u32, until: u32) -> bool {
        self.from < until && from < self.until
    }
}

/// One grid cell.
#[derive(Debug, Clone)]
pub struct PatchNode {
    pub state: SegmentState,
    pub segment: SegmentId,
    pub orientation: Orientation,
    locks: Vec<Lock>,
}

impl PatchNode {
    /// Whether no lock overlaps `[from, until)`.
    pub fn is_free(&self, from: u32, until: u32) -> bool {
        !self.locks.iter().any(|l| l.overlaps(from, until))
    }

    pub fn locks(&self) -> &[Lock] {
        &self.locks
    }
}

/// Grid of patch nodes mirroring a layout.
#[derive(Debug, Clone)]
pub struct PatchGrid {
    height: u32,
    width: u32,
    cells: Vec<PatchNode>,
}

impl PatchGrid {
    /// Mirror the segment states of a layout.
    pub fn new(qcb: &Qcb) -> Self {
        let (height, width) = (qcb.height(), qcb.width());
        let mut cells = Vec::with_capacity((height * width) as usize);
        for y in 0..height {
            for x in 0..width {
                let c = Coord::new(y, x);
                let (segment, state) = qcb
                    .segments()
                    .segment_at(c)
                    .and_then(|id| qcb.segments().get(id))
                    .map_or((SegmentId(u32::MAX), SegmentState::Unallocated), |s| {
                        (s.id, s.state)
                    });
                let orientation = match state {
                    SegmentState::Register | SegmentState::Io => Orientation::Vertical,
                    _ => Orientation::Free,
                };
                cells.push(PatchNode {
                    state,
                    segment,
                    orientation,
                    locks: Vec::new(),
                });
            }
        }
        Self {
            height,
            width,
            cells,
        }
    }

    fn index(&self, c: Coord) -> Option<usize> {
        (c.y < self.height && c.x < self.width).then(|| (c.y * self.width + c.x) as usize)
    }

    pub fn get(&self, c: Coord) -> Option<&PatchNode> {
        self.index(c).map(|i| &self.cells[i])
    }

    /// Whether paths may run through the cell.
    pub fn is_route(&self, c: Coord) -> bool {
        self.get(c).is_some_and(|n| n.state.is_route())
    }

    pub fn is_free(&self, c: Coord, from: u32, until: u32) -> bool {
        self.get(c).is_some_and(|n| n.is_free(from, until))
    }

    /// Lock a cell for `owner`.
    pub fn lock(&mut self, c: Coord, owner: NodeIndex, from: u32, until: u32) {
        if let Some(i) = self.index(c) {
            self.cells[i].locks.push(Lock { owner, from, until });
        }
    }

    /// Drop every lock held by `owner`.
    pub fn release(&mut self, owner: NodeIndex) {
        for cell in &mut self.cells {
            cell.locks.retain(|l| l.owner != owner);
        }
    }

    /// In-grid 4-neighbours with whether the step is vertical.
    pub fn neighbours(&self, c: Coord) -> impl Iterator<Item = (Coord, bool)> + '_ {
        let up = c.y.checked_sub(1).map(|y| (Coord::new(y, c.x), true));
        let down = (c.y + 1 < self.height).then(|| (Coord::new(c.y + 1, c.x), true));
        let left = c.x.checked_sub(1).map(|x| (Coord::new(c.y, x), false));
        let right = (c.x + 1 < self.width).then(|| (Coord::new(c.y, c.x + 1), false));
        [up, down, left, right].into_iter().flatten()
    }

    /// Number of routing neighbours.
    pub fn route_degree(&self, c: Coord) -> usize {
        self.neighbours(c).filter(|(n, _)| self.is_route(*n)).count()
    }

    /// Earliest lock boundary strictly after `t`.
    pub fn next_boundary(&self, t: u32) -> Option<u32> {
        self.cells
            .iter()
            .flat_map(|c| c.locks.iter())
            .flat_map(|l| [l.from, l.until])
            .filter(|&b| b > t)
            .min()
    }

    /// Every routing cell.
    pub fn route_cells(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.height)
            .flat_map(move |y| (0..self.width).map(move |x| Coord::new(y, x)))
            .filter(|&c| self.is_route(c))
    }
}
