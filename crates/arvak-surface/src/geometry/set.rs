//! Segment arena and batched edits.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use super::segment::{Coord, Rect, Segment, SegmentId, SegmentState, Side};
use crate::error::{GeometryError, GeometryResult};

/// A rectangle to be created by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    pub rect: Rect,
    pub state: SegmentState,
    pub allocated: bool,
}

impl Piece {
    /// Free space.
    pub fn free(rect: Rect) -> Self {
        Self {
            rect,
            state: SegmentState::Unallocated,
            allocated: false,
        }
    }

    /// An allocated piece with the given state.
    pub fn allocated(rect: Rect, state: SegmentState) -> Self {
        Self {
            rect,
            state,
            allocated: true,
        }
    }
}

/// A pending change to a [`SegmentSet`].
///
/// Edits are computed against the current set without mutating it and then
/// applied by [`SegmentSet::commit`]. The added pieces must cover exactly
/// the area of the removed segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentEdit {
    pub removed: Vec<SegmentId>,
    pub added: Vec<Piece>,
}

/// Arena of segments that partition a `height x width` grid.
#[derive(Debug, Clone)]
pub struct SegmentSet {
    height: u32,
    width: u32,
    segments: BTreeMap<SegmentId, Segment>,
    next_id: u32,
}

impl SegmentSet {
    /// A grid covered by a single free segment.
    pub fn new(height: u32, width: u32) -> Self {
        let mut set = Self {
            height,
            width,
            segments: BTreeMap::new(),
            next_id: 0,
        };
        if height > 0 && width > 0 {
            let id = set.fresh_id();
            set.segments.insert(
                id,
                Segment::new(
                    id,
                    Rect::new(0, 0, height, width),
                    SegmentState::Unallocated,
                    false,
                ),
            );
        }
        set
    }

    fn fresh_id(&mut self) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Look up a segment.
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(&id)
    }

    /// Look up a segment, failing on unknown ids.
    pub fn segment(&self, id: SegmentId) -> GeometryResult<&Segment> {
        self.segments
            .get(&id)
            .ok_or(GeometryError::UnknownSegment(id))
    }

    /// Segments in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// The segment covering a cell.
    pub fn segment_at(&self, c: Coord) -> Option<SegmentId> {
        self.segments
            .values()
            .find(|s| s.rect.contains(c))
            .map(|s| s.id)
    }

    /// State of the segment covering a cell.
    pub fn state_at(&self, c: Coord) -> Option<SegmentState> {
        self.segment_at(c)
            .and_then(|id| self.segments.get(&id))
            .map(|s| s.state)
    }

    /// Free segments ordered top to bottom, then left to right.
    pub fn free_segments(&self) -> Vec<SegmentId> {
        let mut free: Vec<&Segment> = self.segments.values().filter(|s| s.is_free()).collect();
        free.sort_by_key(|s| (s.rect.y0, s.rect.x0, s.id));
        free.into_iter().map(|s| s.id).collect()
    }

    /// Change the state of a segment in place.
    pub fn set_state(
        &mut self,
        id: SegmentId,
        state: SegmentState,
        allocated: bool,
    ) -> GeometryResult<()> {
        let seg = self
            .segments
            .get_mut(&id)
            .ok_or(GeometryError::UnknownSegment(id))?;
        seg.state = state;
        seg.allocated = allocated;
        Ok(())
    }

    /// Return a segment to free space.
    pub fn release(&mut self, id: SegmentId) -> GeometryResult<()> {
        self.set_state(id, SegmentState::Unallocated, false)
    }

    /// Apply an edit atomically.
    ///
    /// Returns the ids of the added pieces, in edit order. Adjacency of the
    /// new pieces is recomputed against each other and against every former
    /// neighbour of the removed segments; those neighbours drop their links
    /// to the removed ids. Nothing changes if the edit is rejected.
    pub fn commit(&mut self, edit: SegmentEdit) -> GeometryResult<Vec<SegmentId>> {
        self.validate_edit(&edit)?;

        let removed: BTreeSet<SegmentId> = edit.removed.iter().copied().collect();
        let mut candidates: BTreeSet<SegmentId> = BTreeSet::new();
        for id in &removed {
            if let Some(seg) = self.segments.get(id) {
                candidates.extend(seg.all_neighbours().map(|(_, n)| n));
            }
        }
        for id in &removed {
            candidates.remove(id);
            self.segments.remove(id);
        }
        for n in &candidates {
            if let Some(seg) = self.segments.get_mut(n) {
                for side in Side::ALL {
                    seg.neighbours_mut(side).retain(|x| !removed.contains(x));
                }
            }
        }

        let mut added = Vec::with_capacity(edit.added.len());
        for piece in &edit.added {
            let id = self.fresh_id();
            self.segments
                .insert(id, Segment::new(id, piece.rect, piece.state, piece.allocated));
            added.push(id);
        }

        for (i, &id) in added.iter().enumerate() {
            let rect = edit.added[i].rect;
            let others: Vec<SegmentId> = candidates
                .iter()
                .copied()
                .chain(added[i + 1..].iter().copied())
                .collect();
            for other in others {
                let Some(other_rect) = self.segments.get(&other).map(|s| s.rect) else {
                    continue;
                };
                if let Some(side) = rect.touching_side(&other_rect) {
                    self.link(id, other, side);
                }
            }
        }

        trace!(
            "commit: removed {:?}, added {:?}",
            edit.removed,
            added
        );
        Ok(added)
    }

    fn link(&mut self, a: SegmentId, b: SegmentId, side: Side) {
        if let Some(seg) = self.segments.get_mut(&a) {
            seg.neighbours_mut(side).insert(b);
        }
        if let Some(seg) = self.segments.get_mut(&b) {
            seg.neighbours_mut(side.opposite()).insert(a);
        }
    }

    fn validate_edit(&self, edit: &SegmentEdit) -> GeometryResult<()> {
        let mut removed_rects = Vec::with_capacity(edit.removed.len());
        let mut seen = BTreeSet::new();
        for &id in &edit.removed {
            if !seen.insert(id) {
                return Err(GeometryError::InvalidEdit);
            }
            removed_rects.push(self.segment(id)?.rect);
        }

        let removed_area: u64 = removed_rects.iter().map(Rect::area).sum();
        let added_area: u64 = edit.added.iter().map(|p| p.rect.area()).sum();
        if removed_area != added_area {
            return Err(GeometryError::InvalidEdit);
        }

        for (i, piece) in edit.added.iter().enumerate() {
            if piece.rect.is_empty() {
                return Err(GeometryError::InvalidEdit);
            }
            if edit.added[i + 1..]
                .iter()
                .any(|other| piece.rect.intersection(&other.rect).is_some())
            {
                return Err(GeometryError::InvalidEdit);
            }
            // removed rects are disjoint, so summed overlap is the covered area
            let covered: u64 = removed_rects
                .iter()
                .filter_map(|r| r.intersection(&piece.rect))
                .map(|r| r.area())
                .sum();
            if covered != piece.rect.area() {
                return Err(GeometryError::InvalidEdit);
            }
        }
        Ok(())
    }

    /// Check the partition and adjacency invariants.
    ///
    /// Segments must tile the grid exactly, and every pair of edge-touching
    /// segments must list each other on opposite sides.
    pub fn check_invariants(&self) -> GeometryResult<()> {
        let grid = Rect::new(0, 0, self.height, self.width);
        let segs: Vec<&Segment> = self.segments.values().collect();

        let mut area = 0;
        for (i, a) in segs.iter().enumerate() {
            if a.rect.is_empty() || !grid.contains_rect(&a.rect) {
                return Err(GeometryError::InvariantViolation(format!(
                    "{} has invalid bounds {}",
                    a.id, a.rect
                )));
            }
            area += a.rect.area();
            for b in &segs[i + 1..] {
                if a.rect.intersection(&b.rect).is_some() {
                    return Err(GeometryError::InvariantViolation(format!(
                        "{} overlaps {}",
                        a.id, b.id
                    )));
                }
            }
        }
        if area != grid.area() {
            return Err(GeometryError::InvariantViolation(format!(
                "segments cover {area} of {} cells",
                grid.area()
            )));
        }

        for a in &segs {
            for b in &segs {
                if a.id == b.id {
                    continue;
                }
                let expected = a.rect.touching_side(&b.rect);
                for side in Side::ALL {
                    let listed = a.neighbours(side).contains(&b.id);
                    if listed != (expected == Some(side)) {
                        return Err(GeometryError::InvariantViolation(format!(
                            "{} lists {} on {side:?}: {listed}",
                            a.id, b.id
                        )));
                    }
                    if listed && !b.neighbours(side.opposite()).contains(&a.id) {
                        return Err(GeometryError::InvariantViolation(format!(
                            "{} -> {} link is not mutual",
                            a.id, b.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_set() {
        let set = SegmentSet::new(3, 4);
        assert_eq!(set.len(), 1);
        assert!(set.check_invariants().is_ok());
        assert_eq!(set.segment_at(Coord::new(2, 3)), Some(SegmentId(0)));
        assert_eq!(set.segment_at(Coord::new(3, 0)), None);
    }

    #[test]
    fn test_commit_links_pieces() {
        let mut set = SegmentSet::new(2, 2);
        let ids = set
            .commit(SegmentEdit {
                removed: vec![SegmentId(0)],
                added: vec![
                    Piece::free(Rect::new(0, 0, 1, 2)),
                    Piece::allocated(Rect::new(1, 0, 1, 1), SegmentState::Register),
                    Piece::allocated(Rect::new(1, 1, 1, 1), SegmentState::Route),
                ],
            })
            .unwrap();
        assert_eq!(ids.len(), 3);
        set.check_invariants().unwrap();

        let top = set.get(ids[0]).unwrap();
        assert_eq!(
            top.below.iter().copied().collect::<Vec<_>>(),
            vec![ids[1], ids[2]]
        );
        assert!(set.get(ids[1]).unwrap().right.contains(&ids[2]));
    }

    #[test]
    fn test_commit_rejects_bad_area() {
        let mut set = SegmentSet::new(2, 2);
        let err = set.commit(SegmentEdit {
            removed: vec![SegmentId(0)],
            added: vec![Piece::free(Rect::new(0, 0, 1, 2))],
        });
        assert!(matches!(err, Err(GeometryError::InvalidEdit)));
        assert_eq!(set.len(), 1);

        let err = set.commit(SegmentEdit {
            removed: vec![SegmentId(0)],
            added: vec![
                Piece::free(Rect::new(0, 0, 2, 1)),
                Piece::free(Rect::new(0, 0, 2, 1)),
            ],
        });
        assert!(matches!(err, Err(GeometryError::InvalidEdit)));
    }
}
