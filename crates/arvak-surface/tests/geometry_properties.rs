//! Property-based tests for the segment arena.

use arvak_surface::geometry::{Rect, SegmentSet, SegmentState};
use proptest::prelude::*;

/// A box request relative to whatever segment it lands on.
#[derive(Debug, Clone)]
struct Carve {
    pick: usize,
    fy: f64,
    fx: f64,
    fh: f64,
    fw: f64,
}

fn arb_carve() -> impl Strategy<Value = Carve> {
    (any::<usize>(), 0.0..1.0, 0.0..1.0, 0.0..1.0, 0.0..1.0).prop_map(|(pick, fy, fx, fh, fw)| {
        Carve {
            pick,
            fy,
            fx,
            fh,
            fw,
        }
    })
}

/// Scale a fraction onto `0..n`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale(f: f64, n: u32) -> u32 {
    ((f * f64::from(n)) as u32).min(n.saturating_sub(1))
}

fn boxed(rect: Rect, c: &Carve) -> (u32, u32, u32, u32) {
    let dy = scale(c.fy, rect.height());
    let dx = scale(c.fx, rect.width());
    let h = scale(c.fh, rect.height() - dy) + 1;
    let w = scale(c.fw, rect.width() - dx) + 1;
    (rect.y0 + dy, rect.x0 + dx, h, w)
}

proptest! {
    #[test]
    fn partition_holds_under_allocation(
        height in 1_u32..12,
        width in 1_u32..12,
        carves in prop::collection::vec(arb_carve(), 1..20),
    ) {
        let mut set = SegmentSet::new(height, width);
        for c in &carves {
            let free = set.free_segments();
            if free.is_empty() {
                break;
            }
            let id = free[c.pick % free.len()];
            let rect = set.get(id).unwrap().rect;
            let (y, x, h, w) = boxed(rect, c);
            let placed = set.alloc_at(id, y, x, h, w, SegmentState::Register);
            prop_assert!(placed.is_some());
            prop_assert!(set.check_invariants().is_ok());
        }

        set.global_top_merge();
        set.global_left_merge();
        prop_assert!(set.check_invariants().is_ok());
    }

    #[test]
    fn split_is_undone_by_merges(
        height in 1_u32..16,
        width in 1_u32..16,
        carve in arb_carve(),
    ) {
        let mut set = SegmentSet::new(height, width);
        let root = set.free_segments()[0];
        let (y, x, h, w) = boxed(Rect::new(0, 0, height, width), &carve);
        let ids = set.split(root, y, x, h, w).unwrap();
        prop_assert_eq!(set.get(ids[0]).unwrap().rect, Rect::new(y, x, h, w));
        prop_assert!(set.check_invariants().is_ok());

        set.global_left_merge();
        set.global_top_merge();
        prop_assert_eq!(set.len(), 1);
        let only = set.iter().next().unwrap();
        prop_assert_eq!(only.rect, Rect::new(0, 0, height, width));
        prop_assert!(only.all_neighbours().next().is_none());
    }

    #[test]
    fn split_equals_committed_edit(
        height in 1_u32..10,
        width in 1_u32..10,
        carve in arb_carve(),
    ) {
        let mut direct = SegmentSet::new(height, width);
        let mut staged = direct.clone();
        let root = direct.free_segments()[0];
        let (y, x, h, w) = boxed(Rect::new(0, 0, height, width), &carve);

        direct.split(root, y, x, h, w).unwrap();
        let edit = staged.split_edit(root, y, x, h, w).unwrap();
        staged.commit(edit).unwrap();

        let rects = |s: &SegmentSet| {
            let mut r: Vec<Rect> = s.iter().map(|seg| seg.rect).collect();
            r.sort();
            r
        };
        prop_assert_eq!(rects(&direct), rects(&staged));
    }
}
