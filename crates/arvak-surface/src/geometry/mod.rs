//! Geometry engine.
//!
//! The grid is partitioned into rectangular [`Segment`]s held in a
//! [`SegmentSet`] arena. Every change is expressed as a [`SegmentEdit`]
//! (segments removed, pieces added) and applied by a single
//! [`SegmentSet::commit`], which keeps the partition and the mutual
//! adjacency sets consistent.

mod ops;
mod qcb;
mod segment;
mod set;

pub use qcb::{ExternInstance, Qcb};
pub use segment::{Coord, ExternHandle, Rect, Segment, SegmentId, SegmentState, Side};
pub use set::{Piece, SegmentEdit, SegmentSet};
