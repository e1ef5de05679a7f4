//! A* search over routing cells.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use super::patch::{Orientation, PatchGrid};
use crate::geometry::Coord;

/// Weight of a vertical step in the heuristic.
const VERTICAL_BIAS: f64 = 1.01;

/// Switch cells that may be held for a shorter interval than the gate.
pub(crate) struct Relaxation<'a> {
    pub switches: &'a FxHashSet<Coord>,
    /// Switch cells that are endpoints of a teleport in the same window,
    /// which another teleport may join.
    pub shared: &'a FxHashSet<Coord>,
    pub from: u32,
    pub until: u32,
}

/// Constraints of one search.
pub(crate) struct SearchRequest<'a> {
    pub grid: &'a PatchGrid,
    /// Interval every interior cell must be free for.
    pub from: u32,
    pub until: u32,
    /// Cells already claimed by the same gate.
    pub blocked: &'a FxHashSet<Coord>,
    pub relaxed: Option<Relaxation<'a>>,
}

impl SearchRequest<'_> {
    fn passable(&self, c: Coord) -> bool {
        if !self.grid.is_route(c) || self.blocked.contains(&c) {
            return false;
        }
        if self.grid.is_free(c, self.from, self.until) {
            return true;
        }
        self.relaxed.as_ref().is_some_and(|r| {
            r.switches.contains(&c)
                && (self.grid.is_free(c, r.from, r.until) || r.shared.contains(&c))
        })
    }

    fn vertical_only(&self, c: Coord) -> bool {
        self.grid
            .get(c)
            .is_some_and(|n| n.orientation == Orientation::Vertical)
    }
}

/// Search node; ordered as a min-heap on `f_score`, then insertion order.
struct AStarNode {
    cell: Coord,
    f_score: f64,
    seq: u64,
}

impl Eq for AStarNode {}

impl PartialEq for AStarNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn heuristic(a: Coord, b: Coord) -> f64 {
    f64::from(a.x.abs_diff(b.x)) + VERTICAL_BIAS * f64::from(a.y.abs_diff(b.y))
}

/// Shortest path from `start` to `goal` through passable routing cells.
///
/// The path includes both endpoints. Endpoint patches with vertical
/// orientation are left and entered only by vertical steps.
pub(crate) fn find_path(req: &SearchRequest<'_>, start: Coord, goal: Coord) -> Option<Vec<Coord>> {
    let mut open_set = BinaryHeap::new();
    let mut came_from: FxHashMap<Coord, Coord> = FxHashMap::default();
    let mut g_score: FxHashMap<Coord, f64> = FxHashMap::default();
    let mut closed: FxHashSet<Coord> = FxHashSet::default();
    let mut seq = 0;

    g_score.insert(start, 0.0);
    open_set.push(AStarNode {
        cell: start,
        f_score: heuristic(start, goal),
        seq,
    });

    while let Some(current) = open_set.pop() {
        if current.cell == goal {
            return Some(reconstruct_path(&came_from, goal));
        }
        if !closed.insert(current.cell) {
            continue;
        }
        let current_g = g_score.get(&current.cell).copied().unwrap_or(f64::INFINITY);

        for (next, vertical) in req.grid.neighbours(current.cell) {
            if current.cell == start && !vertical && req.vertical_only(start) {
                continue;
            }
            if next == goal {
                if !vertical && req.vertical_only(goal) {
                    continue;
                }
            } else if !req.passable(next) {
                continue;
            }

            let tentative = current_g + 1.0;
            if tentative < g_score.get(&next).copied().unwrap_or(f64::INFINITY) {
                came_from.insert(next, current.cell);
                g_score.insert(next, tentative);
                seq += 1;
                open_set.push(AStarNode {
                    cell: next,
                    f_score: tentative + heuristic(next, goal),
                    seq,
                });
            }
        }
    }
    None
}

fn reconstruct_path(came_from: &FxHashMap<Coord, Coord>, end: Coord) -> Vec<Coord> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Piece, Qcb, Rect, SegmentId, SegmentSet, SegmentState};
    use arvak_surface_ir::NodeIndex;

    /// Row 0: four registers; row 1: routing.
    fn strip() -> PatchGrid {
        let mut set = SegmentSet::new(2, 4);
        let mut pieces: Vec<Piece> = (0..4)
            .map(|x| Piece::allocated(Rect::new(0, x, 1, 1), SegmentState::Register))
            .collect();
        pieces.push(Piece::allocated(Rect::new(1, 0, 1, 4), SegmentState::Route));
        set.partition(SegmentId(0), pieces).unwrap();
        PatchGrid::new(&Qcb::from_segments(set, 0))
    }

    fn request<'a>(grid: &'a PatchGrid, blocked: &'a FxHashSet<Coord>) -> SearchRequest<'a> {
        SearchRequest {
            grid,
            from: 0,
            until: 1,
            blocked,
            relaxed: None,
        }
    }

    #[test]
    fn test_path_between_registers() {
        let grid = strip();
        let blocked = FxHashSet::default();
        let path = find_path(&request(&grid, &blocked), Coord::new(0, 0), Coord::new(0, 3)).unwrap();
        assert_eq!(
            path,
            vec![
                Coord::new(0, 0),
                Coord::new(1, 0),
                Coord::new(1, 1),
                Coord::new(1, 2),
                Coord::new(1, 3),
                Coord::new(0, 3)
            ]
        );
    }

    #[test]
    fn test_adjacent_registers_need_routing() {
        // side-by-side registers may not touch horizontally
        let grid = strip();
        let blocked = FxHashSet::default();
        let path = find_path(&request(&grid, &blocked), Coord::new(0, 0), Coord::new(0, 1)).unwrap();
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_locked_cell_blocks_path() {
        let mut grid = strip();
        grid.lock(Coord::new(1, 1), NodeIndex::new(0), 0, 3);
        let blocked = FxHashSet::default();
        assert!(find_path(&request(&grid, &blocked), Coord::new(0, 0), Coord::new(0, 3)).is_none());

        let switches: FxHashSet<Coord> = [Coord::new(1, 1)].into_iter().collect();
        let shared = FxHashSet::default();
        let req = SearchRequest {
            grid: &grid,
            from: 3,
            until: 6,
            blocked: &blocked,
            relaxed: None,
        };
        assert!(find_path(&req, Coord::new(0, 0), Coord::new(0, 3)).is_some());

        let req = SearchRequest {
            grid: &grid,
            from: 2,
            until: 6,
            blocked: &blocked,
            relaxed: Some(Relaxation {
                switches: &switches,
                shared: &shared,
                from: 5,
                until: 6,
            }),
        };
        assert!(find_path(&req, Coord::new(0, 0), Coord::new(0, 3)).is_some());

        // a teleport endpoint in the same window may be joined
        let shared: FxHashSet<Coord> = [Coord::new(1, 1)].into_iter().collect();
        let req = SearchRequest {
            grid: &grid,
            from: 0,
            until: 3,
            blocked: &blocked,
            relaxed: Some(Relaxation {
                switches: &switches,
                shared: &shared,
                from: 0,
                until: 1,
            }),
        };
        assert!(find_path(&req, Coord::new(0, 0), Coord::new(0, 3)).is_some());
    }
}
