//! Split and merge operations on a [`SegmentSet`].

use tracing::debug;

use super::segment::{Rect, Segment, SegmentId, SegmentState, Side};
use super::set::{Piece, SegmentEdit, SegmentSet};
use crate::error::{GeometryError, GeometryResult};

/// Upper bound on passes of a global merge.
const MAX_MERGE_PASSES: usize = 1024;

impl SegmentSet {
    /// Edit carving the box `h x w` at `(y, x)` out of segment `id`.
    ///
    /// The box is the first added piece; the remainder follows as top band,
    /// bottom band, left part and right part, each keeping the parent state.
    pub fn split_edit(
        &self,
        id: SegmentId,
        y: u32,
        x: u32,
        h: u32,
        w: u32,
    ) -> GeometryResult<SegmentEdit> {
        let seg = self.segment(id)?;
        if seg.allocated {
            return Err(GeometryError::Allocated(id));
        }
        let inner = Rect::new(y, x, h, w);
        if inner.is_empty() || !seg.rect.contains_rect(&inner) {
            return Err(GeometryError::OutOfBounds {
                segment: id,
                y,
                x,
                h,
                w,
            });
        }

        let state = seg.state;
        let mut added = vec![Piece {
            rect: inner,
            state,
            allocated: false,
        }];
        added.extend(seg.rect.remainder(&inner).into_iter().map(|rect| Piece {
            rect,
            state,
            allocated: false,
        }));
        Ok(SegmentEdit {
            removed: vec![id],
            added,
        })
    }

    /// Split segment `id` around the box `h x w` at `(y, x)`.
    ///
    /// The first returned id is the box.
    pub fn split(
        &mut self,
        id: SegmentId,
        y: u32,
        x: u32,
        h: u32,
        w: u32,
    ) -> GeometryResult<Vec<SegmentId>> {
        let edit = self.split_edit(id, y, x, h, w)?;
        self.commit(edit)
    }

    /// Allocate an `h x w` box at the top-left corner of segment `id`.
    pub fn alloc(
        &mut self,
        id: SegmentId,
        h: u32,
        w: u32,
        state: SegmentState,
    ) -> Option<SegmentId> {
        let rect = self.get(id)?.rect;
        self.alloc_at(id, rect.y0, rect.x0, h, w, state)
    }

    /// Allocate the box `h x w` at `(y, x)` inside segment `id`.
    ///
    /// Returns `None` if the segment is allocated or the box does not fit.
    pub fn alloc_at(
        &mut self,
        id: SegmentId,
        y: u32,
        x: u32,
        h: u32,
        w: u32,
        state: SegmentState,
    ) -> Option<SegmentId> {
        let seg = self.get(id)?;
        if seg.allocated || h > seg.height() || w > seg.width() {
            return None;
        }
        let mut edit = self.split_edit(id, y, x, h, w).ok()?;
        edit.added[0].state = state;
        edit.added[0].allocated = true;
        self.commit(edit).ok()?.first().copied()
    }

    /// Replace an unallocated segment by an exact tiling of it.
    pub fn partition(&mut self, id: SegmentId, pieces: Vec<Piece>) -> GeometryResult<Vec<SegmentId>> {
        let seg = self.segment(id)?;
        if seg.allocated {
            return Err(GeometryError::Allocated(id));
        }
        let outer = seg.rect;
        let area: u64 = pieces.iter().map(|p| p.rect.area()).sum();
        let disjoint = pieces.iter().enumerate().all(|(i, p)| {
            pieces[i + 1..]
                .iter()
                .all(|q| p.rect.intersection(&q.rect).is_none())
        });
        if area != outer.area()
            || !disjoint
            || pieces
                .iter()
                .any(|p| p.rect.is_empty() || !outer.contains_rect(&p.rect))
        {
            return Err(GeometryError::InvalidPartition(id));
        }
        self.commit(SegmentEdit {
            removed: vec![id],
            added: pieces,
        })
    }

    fn free_pair(&self, a: SegmentId, b: SegmentId) -> Option<(&Segment, &Segment)> {
        let sa = self.get(a)?;
        let sb = self.get(b)?;
        (a != b && sa.is_free() && sb.is_free()).then_some((sa, sb))
    }

    /// Merge two side-by-side free segments spanning the same rows.
    pub fn horizontal_merge(&mut self, a: SegmentId, b: SegmentId) -> Option<SegmentId> {
        let (sa, sb) = self.free_pair(a, b)?;
        let (l, r) = if sa.rect.x1 == sb.rect.x0 {
            (sa.rect, sb.rect)
        } else if sb.rect.x1 == sa.rect.x0 {
            (sb.rect, sa.rect)
        } else {
            return None;
        };
        if l.y0 != r.y0 || l.y1 != r.y1 {
            return None;
        }
        let merged = Rect {
            y0: l.y0,
            x0: l.x0,
            y1: l.y1,
            x1: r.x1,
        };
        self.merge_into(vec![a, b], merged, Vec::new())
    }

    /// Merge two stacked free segments spanning the same columns.
    pub fn vertical_merge(&mut self, a: SegmentId, b: SegmentId) -> Option<SegmentId> {
        let (sa, sb) = self.free_pair(a, b)?;
        let (t, u) = if sa.rect.y1 == sb.rect.y0 {
            (sa.rect, sb.rect)
        } else if sb.rect.y1 == sa.rect.y0 {
            (sb.rect, sa.rect)
        } else {
            return None;
        };
        if t.x0 != u.x0 || t.x1 != u.x1 {
            return None;
        }
        let merged = Rect {
            y0: t.y0,
            x0: t.x0,
            y1: u.y1,
            x1: t.x1,
        };
        self.merge_into(vec![a, b], merged, Vec::new())
    }

    /// Grow a free segment rightwards over all of its right neighbours.
    ///
    /// The segment absorbs a column band as wide as its narrowest right
    /// neighbour; the parts of the neighbours outside that band stay behind
    /// as separate free segments. Returns `None` if the segment has no right
    /// neighbour or any of them is allocated.
    pub fn left_merge(&mut self, id: SegmentId) -> Option<SegmentId> {
        self.directional_merge(id, Side::Right)
    }

    /// Grow a free segment downwards over all of its lower neighbours.
    pub fn top_merge(&mut self, id: SegmentId) -> Option<SegmentId> {
        self.directional_merge(id, Side::Below)
    }

    fn directional_merge(&mut self, id: SegmentId, side: Side) -> Option<SegmentId> {
        let seg = self.get(id)?;
        if !seg.is_free() || seg.neighbours(side).is_empty() {
            return None;
        }
        let base = seg.rect;
        let mut neighbours = Vec::new();
        for n in seg.neighbours(side) {
            let ns = self.get(*n)?;
            if !ns.is_free() {
                return None;
            }
            neighbours.push(ns.rect);
        }

        let mut leftovers = Vec::new();
        let merged = if side == Side::Right {
            let w = neighbours.iter().map(Rect::width).min()?;
            for r in &neighbours {
                let band = Rect {
                    y0: r.y0.max(base.y0),
                    x0: r.x0,
                    y1: r.y1.min(base.y1),
                    x1: r.x0 + w,
                };
                leftovers.extend(r.remainder(&band));
            }
            Rect {
                x1: base.x1 + w,
                ..base
            }
        } else {
            let h = neighbours.iter().map(Rect::height).min()?;
            for r in &neighbours {
                let band = Rect {
                    y0: r.y0,
                    x0: r.x0.max(base.x0),
                    y1: r.y0 + h,
                    x1: r.x1.min(base.x1),
                };
                leftovers.extend(r.remainder(&band));
            }
            Rect {
                y1: base.y1 + h,
                ..base
            }
        };

        let mut removed = vec![id];
        removed.extend(self.get(id)?.neighbours(side).iter().copied());
        self.merge_into(removed, merged, leftovers)
    }

    fn merge_into(
        &mut self,
        removed: Vec<SegmentId>,
        merged: Rect,
        leftovers: Vec<Rect>,
    ) -> Option<SegmentId> {
        let mut added = vec![Piece::free(merged)];
        added.extend(leftovers.into_iter().map(Piece::free));
        self.commit(SegmentEdit { removed, added })
            .ok()?
            .first()
            .copied()
    }

    /// Repeat vertical merges of aligned free pairs until none applies.
    ///
    /// Returns the number of merges performed.
    pub fn global_top_merge(&mut self) -> usize {
        self.merge_to_fixed_point(Side::Below)
    }

    /// Repeat horizontal merges of aligned free pairs until none applies.
    pub fn global_left_merge(&mut self) -> usize {
        self.merge_to_fixed_point(Side::Right)
    }

    fn merge_to_fixed_point(&mut self, side: Side) -> usize {
        let mut merges = 0;
        for _ in 0..MAX_MERGE_PASSES {
            let Some((a, b)) = self.aligned_free_pair(side) else {
                break;
            };
            let done = if side == Side::Below {
                self.vertical_merge(a, b)
            } else {
                self.horizontal_merge(a, b)
            };
            if done.is_none() {
                break;
            }
            merges += 1;
        }
        if merges > 0 {
            debug!("{side:?} merge pass: {merges} merges, {} segments", self.len());
        }
        merges
    }

    fn aligned_free_pair(&self, side: Side) -> Option<(SegmentId, SegmentId)> {
        self.iter().filter(|s| s.is_free()).find_map(|s| {
            let mut it = s.neighbours(side).iter();
            let n = *it.next()?;
            if it.next().is_some() {
                return None;
            }
            let ns = self.get(n)?;
            let aligned = if side == Side::Below {
                ns.rect.x0 == s.rect.x0 && ns.rect.x1 == s.rect.x1
            } else {
                ns.rect.y0 == s.rect.y0 && ns.rect.y1 == s.rect.y1
            };
            (aligned && ns.is_free()).then_some((s.id, n))
        })
    }
}
