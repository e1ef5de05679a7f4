//! Placement allocator.
//!
//! Lays out a [`Qcb`] for a dependency graph in four mandatory phases:
//!
//! 1. an I/O strip on the bottom row with a full-width routing row above it,
//! 2. extern blocks, largest first, each dropping a connector to the routing net,
//! 3. extra connectors for routing components cut off from the I/O row,
//! 4. register strips filling the remaining free space.
//!
//! A [`Plan`] fixes which extern instances and how many extra routing lanes
//! the layout carries. The optimiser in [`Allocator::optimise`] searches over
//! plans, scoring each layout with the DAG scheduler.

mod fill;
mod optimise;

pub use optimise::Placement;

use std::collections::BTreeSet;

use arvak_surface_ir::{DependencyGraph, ExternTemplate};
use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use crate::config::CompilerConfig;
use crate::error::{AllocatorError, AllocatorResult, CompileError, CompileResult};
use crate::geometry::{Coord, Piece, Qcb, Rect, SegmentId, SegmentSet, SegmentState};

/// What a layout should contain beyond the graph's registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// One entry per extern instance.
    pub externs: Vec<ExternTemplate>,
    /// Register strips to split with an extra routing lane.
    pub lanes: usize,
}

impl Plan {
    /// One instance of every template the graph requires.
    pub fn initial(graph: &DependencyGraph, config: &CompilerConfig) -> CompileResult<Self> {
        let externs = graph
            .extern_templates()
            .iter()
            .map(|name| {
                config
                    .extern_template(name)
                    .cloned()
                    .ok_or_else(|| CompileError::UnknownExtern(name.clone()))
            })
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Self { externs, lanes: 0 })
    }

    /// The same plan with one more routing lane.
    #[must_use]
    pub fn with_lane(&self) -> Self {
        Self {
            externs: self.externs.clone(),
            lanes: self.lanes + 1,
        }
    }

    /// The same plan with one more instance of `template`.
    #[must_use]
    pub fn with_instance(&self, template: &ExternTemplate) -> Self {
        let mut externs = self.externs.clone();
        externs.push(template.clone());
        Self {
            externs,
            lanes: self.lanes,
        }
    }

    /// Distinct templates, in order of first appearance.
    pub fn templates(&self) -> Vec<&ExternTemplate> {
        let mut seen = BTreeSet::new();
        self.externs
            .iter()
            .filter(|t| seen.insert(t.symbol.as_str()))
            .collect()
    }
}

/// Extern block position chosen inside a free segment.
#[derive(Debug, Clone, Copy)]
struct BlockSite {
    segment: SegmentId,
    y: u32,
    x: u32,
    /// First routing row the connector reaches.
    stop: u32,
}

/// Lays out grids for one dependency graph.
pub struct Allocator<'a> {
    graph: &'a DependencyGraph,
    height: u32,
    width: u32,
}

impl<'a> Allocator<'a> {
    /// Create an allocator for a `height x width` grid.
    pub fn new(graph: &'a DependencyGraph, height: u32, width: u32) -> Self {
        Self {
            graph,
            height,
            width,
        }
    }

    /// Run the mandatory placement phases for a plan.
    #[instrument(skip(self, plan), fields(externs = plan.externs.len(), lanes = plan.lanes))]
    pub fn place(&self, plan: &Plan) -> AllocatorResult<Qcb> {
        let mut qcb = Qcb::new(self.height, self.width);
        let main_row = self.place_io(&mut qcb)?;

        let mut externs: Vec<&ExternTemplate> = plan.externs.iter().collect();
        externs.sort_by(|a, b| b.area().cmp(&a.area()));
        for template in externs {
            self.place_extern(&mut qcb, template)?;
        }

        connect_routes(qcb.segments_mut(), Coord::new(main_row, 0))?;
        fill::fill_registers(qcb.segments_mut())?;
        for _ in 0..plan.lanes {
            split_lane(qcb.segments_mut())?;
        }
        self.check_capacity(&qcb)?;

        debug!(
            "Placed {}x{} grid, {} segments, {} channels\n{}",
            self.height,
            self.width,
            qcb.segments().len(),
            qcb.n_channels(),
            qcb.render()
        );
        Ok(qcb)
    }

    /// Phase 1. Returns the row of the main routing row.
    fn place_io(&self, qcb: &mut Qcb) -> AllocatorResult<u32> {
        let (h, w) = (self.height, self.width);
        if h < 2 || w == 0 {
            return Err(AllocatorError::GridTooSmall {
                height: h,
                width: w,
            });
        }
        let io = u32::try_from(self.graph.num_io()).unwrap_or(u32::MAX);
        if io > w {
            return Err(AllocatorError::IoExhausted { width: io });
        }

        let set = qcb.segments_mut();
        let root = set
            .segment_at(Coord::new(0, 0))
            .ok_or(AllocatorError::GridTooSmall {
                height: h,
                width: w,
            })?;
        let main_row = if io > 0 {
            set.alloc_at(root, h - 1, 0, 1, io, SegmentState::Io)
                .ok_or(AllocatorError::IoExhausted { width: io })?;
            h - 2
        } else {
            h - 1
        };
        let host = set
            .segment_at(Coord::new(main_row, 0))
            .ok_or(AllocatorError::GridTooSmall {
                height: h,
                width: w,
            })?;
        set.alloc_at(host, main_row, 0, 1, w, SegmentState::Route)
            .ok_or(AllocatorError::GridTooSmall {
                height: h,
                width: w,
            })?;
        qcb.set_io_width(io);
        Ok(main_row)
    }

    /// Phase 2 for one instance.
    fn place_extern(&self, qcb: &mut Qcb, template: &ExternTemplate) -> AllocatorResult<()> {
        let set = qcb.segments_mut();
        set.global_top_merge();
        set.global_left_merge();

        let site = match find_block_site(set, template) {
            Some(site) => site,
            None => {
                extra_top_merge(set);
                find_block_site(set, template).ok_or_else(|| {
                    AllocatorError::ExternExhausted {
                        template: template.symbol.clone(),
                        height: template.height,
                        width: template.width,
                    }
                })?
            }
        };

        let (th, tw) = (template.height, template.width);
        let handle = qcb.next_handle();
        let set = qcb.segments_mut();
        let outer = set.segment(site.segment)?.rect;
        let block = Rect::new(site.y, site.x, th + 1, tw + 1);
        let margin = Rect::new(site.y, site.x + tw, th, 1);
        // only a block on the left edge takes a drop on its right side
        let margin = if site.x == 0 {
            Piece::allocated(margin, SegmentState::LocalRoute)
        } else {
            Piece::free(margin)
        };
        let mut pieces = vec![
            Piece::allocated(
                Rect::new(site.y, site.x, th, tw),
                SegmentState::Extern(handle),
            ),
            Piece::allocated(
                Rect::new(site.y + th, site.x, 1, tw + 1),
                SegmentState::LocalRoute,
            ),
            margin,
        ];
        pieces.extend(outer.remainder(&block).into_iter().map(Piece::free));
        let ids = set.partition(site.segment, pieces)?;

        carve_connector(set, site.y + th + 1, site.x + tw, site.stop)?;
        set.global_top_merge();
        set.global_left_merge();

        let segment = ids[0];
        qcb.add_extern(template, segment);
        debug!(
            "Placed extern '{}' as {handle} at ({}, {})",
            template.symbol, site.y, site.x
        );
        Ok(())
    }

    fn check_capacity(&self, qcb: &Qcb) -> AllocatorResult<()> {
        let registers = usize::try_from(qcb.capacity(SegmentState::Register)).unwrap_or(usize::MAX);
        let required = self.graph.num_registers();
        if registers < required {
            return Err(AllocatorError::InsufficientSlots {
                kind: "register",
                required,
                available: registers,
            });
        }
        let io = usize::try_from(qcb.capacity(SegmentState::Io)).unwrap_or(usize::MAX);
        if io < self.graph.num_io() {
            return Err(AllocatorError::InsufficientSlots {
                kind: "I/O",
                required: self.graph.num_io(),
                available: io,
            });
        }
        Ok(())
    }
}

/// Walk down column `x` from row `y` over free cells until a routing cell
/// accepted by `accept`. Returns that row.
fn probe_down(
    set: &SegmentSet,
    mut y: u32,
    x: u32,
    accept: impl Fn(SegmentId) -> bool,
) -> Option<u32> {
    while y < set.height() {
        let id = set.segment_at(Coord::new(y, x))?;
        let seg = set.get(id)?;
        if seg.state.is_route() {
            return accept(id).then_some(y);
        }
        if !seg.is_free() {
            return None;
        }
        y += 1;
    }
    None
}

fn find_block_site(set: &SegmentSet, template: &ExternTemplate) -> Option<BlockSite> {
    let (bh, bw) = (template.height + 1, template.width + 1);
    for id in set.free_segments() {
        let rect = set.get(id)?.rect;
        if rect.height() < bh || rect.width() < bw {
            continue;
        }
        let y = rect.y1 - bh;
        for x in [rect.x0, rect.x1 - bw] {
            let xc = x + template.width;
            if let Some(stop) = probe_down(set, y + bh, xc, |_| true) {
                return Some(BlockSite {
                    segment: id,
                    y,
                    x,
                    stop,
                });
            }
        }
    }
    None
}

/// Grow every free segment downwards as far as it goes.
fn extra_top_merge(set: &mut SegmentSet) {
    for id in set.free_segments() {
        let mut current = id;
        for _ in 0..set.height() {
            match set.top_merge(current) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    set.global_left_merge();
}

/// Allocate a one-wide routing column over the free cells `y..stop` of
/// column `x`.
fn carve_connector(set: &mut SegmentSet, mut y: u32, x: u32, stop: u32) -> AllocatorResult<()> {
    while y < stop {
        let id = set
            .segment_at(Coord::new(y, x))
            .ok_or(AllocatorError::GridTooSmall {
                height: set.height(),
                width: set.width(),
            })?;
        let len = set.segment(id)?.rect.y1.min(stop) - y;
        set.alloc_at(id, y, x, len, 1, SegmentState::Route)
            .ok_or(AllocatorError::Disconnected(id))?;
        y += len;
    }
    Ok(())
}

/// Connected components of routing segments, keyed by segment.
fn route_components(set: &SegmentSet) -> FxHashMap<SegmentId, usize> {
    let mut component = FxHashMap::default();
    let mut next = 0;
    for seg in set.iter().filter(|s| s.state.is_route()) {
        if component.contains_key(&seg.id) {
            continue;
        }
        let mut stack = vec![seg.id];
        component.insert(seg.id, next);
        while let Some(id) = stack.pop() {
            let Some(s) = set.get(id) else { continue };
            for (_, n) in s.all_neighbours() {
                let routed = set.get(n).is_some_and(|ns| ns.state.is_route());
                if routed && !component.contains_key(&n) {
                    component.insert(n, next);
                    stack.push(n);
                }
            }
        }
        next += 1;
    }
    component
}

/// Phase 3: connect every routing component to the one holding `anchor`.
fn connect_routes(set: &mut SegmentSet, anchor: Coord) -> AllocatorResult<()> {
    let main_seg = set
        .segment_at(anchor)
        .ok_or(AllocatorError::GridTooSmall {
            height: set.height(),
            width: set.width(),
        })?;
    for _ in 0..set.len() {
        let component = route_components(set);
        let Some(&main) = component.get(&main_seg) else {
            return Err(AllocatorError::Disconnected(main_seg));
        };

        // lowest, then left-most, segment of some detached component
        let Some(lowest) = set
            .iter()
            .filter(|s| component.get(&s.id).is_some_and(|&c| c != main))
            .max_by_key(|s| (s.rect.y1, std::cmp::Reverse(s.rect.x0)))
            .map(|s| (s.id, s.rect))
        else {
            return Ok(());
        };

        let (id, rect) = lowest;
        let target = |n: SegmentId| component.get(&n) == Some(&main);
        let found = (rect.x0..rect.x1)
            .find_map(|x| probe_down(set, rect.y1, x, target).map(|stop| (x, stop)));
        let Some((x, stop)) = found else {
            return Err(AllocatorError::Disconnected(id));
        };
        debug!("Connecting detached routing {id} at column {x}");
        carve_connector(set, rect.y1, x, stop)?;
    }
    Ok(())
}

/// Split the widest register strip with a one-wide routing column.
fn split_lane(set: &mut SegmentSet) -> AllocatorResult<()> {
    let widest = set
        .iter()
        .filter(|s| s.state == SegmentState::Register && s.width() >= 3)
        .max_by_key(|s| {
            (
                s.width(),
                std::cmp::Reverse(s.rect.y0),
                std::cmp::Reverse(s.rect.x0),
            )
        })
        .map(|s| (s.id, s.rect))
        .ok_or(AllocatorError::LaneExhausted)?;

    let (id, r) = widest;
    let xc = r.x0 + r.width() / 2;
    set.release(id)?;
    set.partition(
        id,
        vec![
            Piece::allocated(
                Rect::new(r.y0, r.x0, r.height(), xc - r.x0),
                SegmentState::Register,
            ),
            Piece::allocated(Rect::new(r.y0, xc, r.height(), 1), SegmentState::Route),
            Piece::allocated(
                Rect::new(r.y0, xc + 1, r.height(), r.x1 - xc - 1),
                SegmentState::Register,
            ),
        ],
    )?;
    debug!("Split register strip {id} with a routing lane at column {xc}");
    Ok(())
}
