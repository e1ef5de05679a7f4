//! The quantum compute block: a grid, its segments and the placed externs.

use arvak_surface_ir::ExternTemplate;
use serde::{Deserialize, Serialize};

use super::segment::{Coord, ExternHandle, SegmentId, SegmentState};
use super::set::SegmentSet;

/// One placed instance of an extern template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternInstance {
    pub handle: ExternHandle,
    /// Template name, matching [`Symbol::template`](arvak_surface_ir::Symbol::template).
    pub template: String,
    pub segment: SegmentId,
    /// Cycles the factory needs to produce one output.
    pub cycles: u32,
}

/// A laid-out grid.
#[derive(Debug, Clone)]
pub struct Qcb {
    segments: SegmentSet,
    io_width: u32,
    externs: Vec<ExternInstance>,
}

impl Qcb {
    /// An empty grid.
    pub fn new(height: u32, width: u32) -> Self {
        Self::from_segments(SegmentSet::new(height, width), 0)
    }

    /// Wrap an existing segment set.
    pub fn from_segments(segments: SegmentSet, io_width: u32) -> Self {
        Self {
            segments,
            io_width,
            externs: Vec::new(),
        }
    }

    pub fn height(&self) -> u32 {
        self.segments.height()
    }

    pub fn width(&self) -> u32 {
        self.segments.width()
    }

    /// Width of the I/O strip on the bottom row.
    pub fn io_width(&self) -> u32 {
        self.io_width
    }

    pub(crate) fn set_io_width(&mut self, io_width: u32) {
        self.io_width = io_width;
    }

    pub fn segments(&self) -> &SegmentSet {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut SegmentSet {
        &mut self.segments
    }

    /// Placed extern instances, in handle order.
    pub fn externs(&self) -> &[ExternInstance] {
        &self.externs
    }

    /// Look up a placed instance.
    pub fn extern_instance(&self, handle: ExternHandle) -> Option<&ExternInstance> {
        self.externs.get(handle.0 as usize)
    }

    /// Handle the next registered instance will receive.
    pub fn next_handle(&self) -> ExternHandle {
        ExternHandle(self.externs.len() as u32)
    }

    /// Record an extern instance occupying `segment`.
    ///
    /// The segment should carry `SegmentState::Extern(self.next_handle())`.
    pub fn add_extern(&mut self, template: &ExternTemplate, segment: SegmentId) -> ExternHandle {
        let handle = self.next_handle();
        self.externs.push(ExternInstance {
            handle,
            template: template.symbol.clone(),
            segment,
            cycles: template.cycles,
        });
        handle
    }

    /// Cell through which an extern instance is accessed: its bottom-right
    /// cell, next to both routing strips of the block.
    pub fn extern_port(&self, handle: ExternHandle) -> Option<Coord> {
        let inst = self.extern_instance(handle)?;
        let rect = self.segments.get(inst.segment)?.rect;
        Some(Coord::new(rect.y1 - 1, rect.x1 - 1))
    }

    /// Number of instances of a template.
    pub fn num_instances(&self, template: &str) -> usize {
        self.externs.iter().filter(|e| e.template == template).count()
    }

    /// Channel budget: the number of shared routing segments, at least one.
    pub fn n_channels(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.state == SegmentState::Route)
            .count()
            .max(1)
    }

    /// Cells available to segments of the given state.
    pub fn capacity(&self, state: SegmentState) -> u64 {
        self.segments
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.rect.area())
            .sum()
    }

    /// One line per row, one glyph per cell.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for y in 0..self.height() {
            for x in 0..self.width() {
                let glyph = self
                    .segments
                    .state_at(Coord::new(y, x))
                    .map_or(' ', SegmentState::glyph);
                out.push(glyph);
            }
            out.push('\n');
        }
        out
    }
}
