//! Register fill: phase 4 of placement.
//!
//! Free segments are visited top to bottom and sorted into one of four
//! cases, checked in this order:
//!
//! | case                          | action                                      |
//! |-------------------------------|---------------------------------------------|
//! | topmost row                   | registers over the routing run below it     |
//! | routing along the whole top   | register stack growing down from the top    |
//! | two or more rows tall         | stack on full routing below, else a route row on the contact edge |
//! | one-row remainder             | registers over the first contact run        |
//!
//! A segment with no routing contact at all is left free.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::AllocatorResult;
use crate::geometry::{Coord, Piece, Rect, SegmentId, SegmentSet, SegmentState, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillCase {
    TopRow,
    RouteAbove,
    Tall,
    SingleRow,
}

/// What a case decided to do with one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Stack(Side),
    RouteRow(u32),
    ContactRun(u32),
    Skip,
}

fn is_route_at(set: &SegmentSet, y: u32, x: u32) -> bool {
    set.state_at(Coord::new(y, x))
        .is_some_and(SegmentState::is_route)
}

/// Columns of the row `y` that hold routing, restricted to `rect`'s span.
fn route_columns(set: &SegmentSet, rect: &Rect, y: Option<u32>) -> Vec<u32> {
    match y {
        Some(y) if y < set.height() => (rect.x0..rect.x1)
            .filter(|&x| is_route_at(set, y, x))
            .collect(),
        _ => Vec::new(),
    }
}

/// Lowest row of `rect` with routing directly left or right of it.
fn side_contact(set: &SegmentSet, rect: &Rect) -> Option<u32> {
    (rect.y0..rect.y1).rev().find(|&y| {
        let left = rect.x0 > 0 && is_route_at(set, y, rect.x0 - 1);
        let right = rect.x1 < set.width() && is_route_at(set, y, rect.x1);
        left || right
    })
}

fn classify(set: &SegmentSet, rect: &Rect) -> FillCase {
    let width = rect.width() as usize;
    if rect.y0 == 0 && rect.height() == 1 {
        FillCase::TopRow
    } else if route_columns(set, rect, rect.y0.checked_sub(1)).len() == width {
        FillCase::RouteAbove
    } else if rect.height() >= 2 {
        FillCase::Tall
    } else {
        FillCase::SingleRow
    }
}

fn plan(set: &SegmentSet, rect: &Rect, case: FillCase) -> Action {
    let below = route_columns(set, rect, Some(rect.y1));
    let above = route_columns(set, rect, rect.y0.checked_sub(1));
    let side = || side_contact(set, rect).map_or(Action::Skip, Action::RouteRow);
    match case {
        FillCase::TopRow if !below.is_empty() => Action::ContactRun(rect.y1),
        FillCase::TopRow => side(),
        FillCase::RouteAbove => Action::Stack(Side::Above),
        FillCase::Tall if below.len() == rect.width() as usize => Action::Stack(Side::Below),
        FillCase::Tall if !below.is_empty() => Action::RouteRow(rect.y1 - 1),
        FillCase::Tall if !above.is_empty() => Action::RouteRow(rect.y0),
        FillCase::Tall => side(),
        FillCase::SingleRow if !below.is_empty() => Action::ContactRun(rect.y1),
        FillCase::SingleRow if !above.is_empty() => Action::ContactRun(rect.y0 - 1),
        FillCase::SingleRow => side(),
    }
}

/// Fill free space with registers and the routing they need.
pub(super) fn fill_registers(set: &mut SegmentSet) -> AllocatorResult<()> {
    let mut skipped: BTreeSet<Rect> = BTreeSet::new();
    let budget = (set.height() as usize) * (set.width() as usize) * 4 + 16;

    for _ in 0..budget {
        set.global_top_merge();
        set.global_left_merge();

        let next = set
            .free_segments()
            .into_iter()
            .filter_map(|id| set.get(id).map(|s| (id, s.rect)))
            .find(|(_, rect)| !skipped.contains(rect));
        let Some((id, rect)) = next else {
            break;
        };

        let case = classify(set, &rect);
        let action = plan(set, &rect, case);
        trace!("fill {id} {rect}: {case:?} -> {action:?}");
        match action {
            Action::Stack(base) => stack(set, id, rect, base)?,
            Action::RouteRow(y) => route_row(set, id, rect, y)?,
            Action::ContactRun(ry) => contact_run(set, id, rect, ry)?,
            Action::Skip => {
                skipped.insert(rect);
            }
        }
    }
    Ok(())
}

/// Replace `id` by `pieces` tiling `band`, leaving the rest of `rect` free.
fn carve(
    set: &mut SegmentSet,
    id: SegmentId,
    rect: Rect,
    band: Rect,
    mut pieces: Vec<Piece>,
) -> AllocatorResult<()> {
    pieces.retain(|p| !p.rect.is_empty());
    pieces.extend(rect.remainder(&band).into_iter().map(Piece::free));
    set.partition(id, pieces)?;
    Ok(())
}

fn route_row(set: &mut SegmentSet, id: SegmentId, rect: Rect, y: u32) -> AllocatorResult<()> {
    let band = Rect::new(y, rect.x0, 1, rect.width());
    carve(
        set,
        id,
        rect,
        band,
        vec![Piece::allocated(band, SegmentState::Route)],
    )
}

/// One-row remainder: registers over the first run of routing cells in row `ry`.
fn contact_run(set: &mut SegmentSet, id: SegmentId, rect: Rect, ry: u32) -> AllocatorResult<()> {
    let cols = route_columns(set, &rect, Some(ry));
    let Some(&start) = cols.first() else {
        return route_row(set, id, rect, rect.y0);
    };
    let mut end = start + 1;
    while cols.contains(&end) {
        end += 1;
    }
    let band = Rect::new(rect.y0, start, 1, end - start);
    carve(
        set,
        id,
        rect,
        band,
        vec![Piece::allocated(band, SegmentState::Register)],
    )
}

/// Register stack against full routing on `base`.
///
/// One row: a register row. Two rows: both registers if the far edge is
/// routing too, otherwise a register row split by a one-cell drop plus a
/// routing row on the far side. Three or more rows: a two-row register band
/// split by a centre drop, then a routing row; the rest stays free for the
/// next pass. One-wide columns become a corridor ending in a register cell.
fn stack(set: &mut SegmentSet, id: SegmentId, rect: Rect, base: Side) -> AllocatorResult<()> {
    let (k, w) = (rect.height(), rect.width());

    // rows counted from the base edge
    let rows = |i: u32, n: u32| -> Rect {
        match base {
            Side::Below => Rect::new(rect.y1 - i - n, rect.x0, n, w),
            _ => Rect::new(rect.y0 + i, rect.x0, n, w),
        }
    };
    let register = |r: Rect| Piece::allocated(r, SegmentState::Register);
    let route = |r: Rect| Piece::allocated(r, SegmentState::Route);

    if k == 1 {
        return carve(set, id, rect, rect, vec![register(rect)]);
    }

    if w == 1 {
        let corridor = rows(0, k - 1);
        let end = rows(k - 1, 1);
        return carve(set, id, rect, rect, vec![route(corridor), register(end)]);
    }

    let xc = rect.x0 + w / 2;
    let split = |band: Rect| -> Vec<Piece> {
        vec![
            register(Rect {
                x1: xc,
                ..band
            }),
            route(Rect {
                x0: xc,
                x1: xc + 1,
                ..band
            }),
            register(Rect {
                x0: xc + 1,
                ..band
            }),
        ]
    };

    if k == 2 {
        let far = match base {
            Side::Below => rect.y0.checked_sub(1),
            _ => Some(rect.y1),
        };
        if route_columns(set, &rect, far).len() == w as usize {
            return carve(set, id, rect, rect, vec![register(rect)]);
        }
        let mut pieces = split(rows(0, 1));
        pieces.push(route(rows(1, 1)));
        return carve(set, id, rect, rect, pieces);
    }

    let band = rows(0, 3);
    let mut pieces = split(rows(0, 2));
    pieces.push(route(rows(2, 1)));
    carve(set, id, rect, band, pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_route_row(h: u32, w: u32, row: u32) -> SegmentSet {
        let mut set = SegmentSet::new(h, w);
        set.alloc_at(SegmentId(0), row, 0, 1, w, SegmentState::Route)
            .unwrap();
        set
    }

    #[test]
    fn test_stack_above_route() {
        let mut set = with_route_row(5, 9, 4);
        fill_registers(&mut set).unwrap();
        set.check_invariants().unwrap();

        let state = |y, x| set.state_at(Coord::new(y, x));
        assert_eq!(state(3, 0), Some(SegmentState::Register));
        assert_eq!(state(2, 0), Some(SegmentState::Register));
        assert_eq!(state(3, 4), Some(SegmentState::Route));
        assert_eq!(state(1, 0), Some(SegmentState::Route));
        assert_eq!(state(0, 8), Some(SegmentState::Register));
        assert!(set.free_segments().is_empty());
    }

    #[test]
    fn test_stack_below_route() {
        let mut set = with_route_row(2, 4, 0);
        fill_registers(&mut set).unwrap();
        assert_eq!(
            set.state_at(Coord::new(1, 2)),
            Some(SegmentState::Register)
        );
        set.check_invariants().unwrap();
    }

    #[test]
    fn test_two_rows_between_routes() {
        let mut set = with_route_row(4, 3, 3);
        let top = set.segment_at(Coord::new(0, 0)).unwrap();
        set.alloc_at(top, 0, 0, 1, 3, SegmentState::Route).unwrap();
        fill_registers(&mut set).unwrap();
        let reg = set.segment_at(Coord::new(1, 0)).unwrap();
        assert_eq!(set.get(reg).unwrap().rect, Rect::new(1, 0, 2, 3));
    }

    #[test]
    fn test_single_column_corridor() {
        let mut set = with_route_row(4, 1, 3);
        fill_registers(&mut set).unwrap();
        assert_eq!(
            set.state_at(Coord::new(0, 0)),
            Some(SegmentState::Register)
        );
        assert_eq!(set.state_at(Coord::new(1, 0)), Some(SegmentState::Route));
    }

    /// Allocate `w` cells of row `y` from column `x` in whatever segment holds them.
    fn claim(set: &mut SegmentSet, y: u32, x: u32, w: u32, state: SegmentState) {
        let id = set.segment_at(Coord::new(y, x)).unwrap();
        set.alloc_at(id, y, x, 1, w, state).unwrap();
    }

    #[test]
    fn test_top_row_registers_over_contact() {
        let mut set = SegmentSet::new(2, 4);
        claim(&mut set, 1, 0, 2, SegmentState::Route);
        claim(&mut set, 1, 2, 2, SegmentState::Register);
        fill_registers(&mut set).unwrap();
        set.check_invariants().unwrap();

        assert_eq!(set.state_at(Coord::new(0, 0)), Some(SegmentState::Register));
        assert_eq!(set.state_at(Coord::new(0, 1)), Some(SegmentState::Register));
        // the right half has no routing contact
        assert_eq!(set.free_segments().len(), 1);
    }

    #[test]
    fn test_tall_space_routes_along_partial_contact() {
        let mut set = SegmentSet::new(3, 4);
        claim(&mut set, 2, 0, 2, SegmentState::Route);
        claim(&mut set, 2, 2, 2, SegmentState::Register);
        fill_registers(&mut set).unwrap();
        set.check_invariants().unwrap();

        for x in 0..4 {
            assert_eq!(set.state_at(Coord::new(1, x)), Some(SegmentState::Route));
            assert_eq!(
                set.state_at(Coord::new(0, x)),
                Some(SegmentState::Register)
            );
        }
        assert!(set.free_segments().is_empty());
    }

    #[test]
    fn test_single_row_registers_under_contact() {
        let mut set = SegmentSet::new(3, 4);
        claim(&mut set, 0, 0, 2, SegmentState::Route);
        claim(&mut set, 0, 2, 2, SegmentState::Register);
        claim(&mut set, 2, 0, 4, SegmentState::Register);
        fill_registers(&mut set).unwrap();
        set.check_invariants().unwrap();

        assert_eq!(set.state_at(Coord::new(1, 0)), Some(SegmentState::Register));
        assert_eq!(set.state_at(Coord::new(1, 1)), Some(SegmentState::Register));
        assert_eq!(set.free_segments().len(), 1);
    }

    #[test]
    fn test_isolated_space_stays_free() {
        let mut set = SegmentSet::new(3, 3);
        set.alloc_at(SegmentId(0), 1, 0, 1, 3, SegmentState::Register)
            .unwrap();
        fill_registers(&mut set).unwrap();
        assert_eq!(set.free_segments().len(), 2);
    }
}
