//! Symbol-to-cell mapping and extern occupancy.

use std::fmt;

use arvak_surface_ir::{DependencyGraph, Symbol};
use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use crate::error::{CompileError, CompileResult};
use crate::geometry::{Coord, ExternHandle, Qcb};
use crate::tree::{ResourceTree, SlotKind};

/// Occupancy of one extern instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    /// Held by a pending admission that may still roll back.
    Reserved(Symbol),
    Bound(Symbol),
}

/// One row of the extern table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternSlot {
    pub handle: ExternHandle,
    pub template: String,
    pub port: Coord,
    /// Cycle cost of one production round.
    pub cycles: u32,
    /// Tick the instance was last returned to the free pool.
    pub idle_since: u32,
    pub occupancy: Occupancy,
}

/// Proof of a pending extern reservation.
///
/// Must be passed to [`ExternTable::commit`] or [`ExternTable::release`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation must be committed or released"]
pub struct ReservationToken {
    handle: ExternHandle,
    symbol: Symbol,
}

impl ReservationToken {
    pub fn handle(&self) -> ExternHandle {
        self.handle
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

/// Which logical extern handle holds which physical instance.
///
/// Free instances are offered cheapest first, then longest idle, then in
/// table order. A mapper's table is in resource-tree order, so among equals
/// the best-connected instance is used first.
///
/// The scheduler binds factories through a copy of this table and records
/// the instance it chose per gate; the router then asks for that instance
/// with [`ExternTable::try_reserve_handle`].
#[derive(Debug, Clone, Default)]
pub struct ExternTable {
    slots: Vec<ExternSlot>,
}

impl ExternTable {
    /// Table of a layout's instances in placement order.
    pub fn from_qcb(qcb: &Qcb) -> Self {
        let slots = qcb
            .externs()
            .iter()
            .filter_map(|e| {
                Some(ExternSlot {
                    handle: e.handle,
                    template: e.template.clone(),
                    port: qcb.extern_port(e.handle)?,
                    cycles: e.cycles,
                    idle_since: 0,
                    occupancy: Occupancy::Free,
                })
            })
            .collect();
        Self { slots }
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All instances in preference order.
    pub fn slots(&self) -> &[ExternSlot] {
        &self.slots
    }

    /// Instance currently bound to `symbol`.
    pub fn binding(&self, symbol: &Symbol) -> Option<&ExternSlot> {
        self.slots
            .iter()
            .find(|s| matches!(&s.occupancy, Occupancy::Bound(b) if b == symbol))
    }

    /// Reserve a free instance of the symbol's template.
    ///
    /// Returns `None` if the symbol is not an extern handle, is already
    /// bound or reserved, or every instance of its template is taken.
    pub fn try_reserve(&mut self, symbol: &Symbol) -> Option<ReservationToken> {
        let template = symbol.template()?;
        if self.is_held(symbol) {
            return None;
        }
        let pick = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.template == template && s.occupancy == Occupancy::Free)
            .min_by_key(|(i, s)| (s.cycles, s.idle_since, *i))
            .map(|(i, _)| i)?;
        Some(self.reserve_slot(pick, symbol))
    }

    /// Reserve one specific instance for `symbol`.
    ///
    /// Returns `None` if the instance is taken, belongs to another template,
    /// or the symbol already holds an instance.
    pub fn try_reserve_handle(
        &mut self,
        symbol: &Symbol,
        handle: ExternHandle,
    ) -> Option<ReservationToken> {
        let template = symbol.template()?;
        if self.is_held(symbol) {
            return None;
        }
        let pick = self.slots.iter().position(|s| {
            s.handle == handle && s.template == template && s.occupancy == Occupancy::Free
        })?;
        Some(self.reserve_slot(pick, symbol))
    }

    fn is_held(&self, symbol: &Symbol) -> bool {
        self.slots.iter().any(|s| match &s.occupancy {
            Occupancy::Reserved(h) | Occupancy::Bound(h) => h == symbol,
            Occupancy::Free => false,
        })
    }

    fn reserve_slot(&mut self, index: usize, symbol: &Symbol) -> ReservationToken {
        let slot = &mut self.slots[index];
        slot.occupancy = Occupancy::Reserved(symbol.clone());
        trace!("reserved {} for {symbol}", slot.handle);
        ReservationToken {
            handle: slot.handle,
            symbol: symbol.clone(),
        }
    }

    /// Tick an instance was last freed.
    pub fn idle_since(&self, handle: ExternHandle) -> Option<u32> {
        self.slots
            .iter()
            .find(|s| s.handle == handle)
            .map(|s| s.idle_since)
    }

    /// Entry cell of an instance.
    pub fn port(&self, handle: ExternHandle) -> Option<Coord> {
        self.slots.iter().find(|s| s.handle == handle).map(|s| s.port)
    }

    fn slot_mut(&mut self, handle: ExternHandle) -> Option<&mut ExternSlot> {
        self.slots.iter_mut().find(|s| s.handle == handle)
    }

    /// Turn a reservation into a binding.
    pub fn commit(&mut self, token: ReservationToken) -> ExternHandle {
        let ReservationToken { handle, symbol } = token;
        if let Some(slot) = self.slot_mut(handle) {
            slot.occupancy = Occupancy::Bound(symbol);
        }
        handle
    }

    /// Roll back a reservation.
    pub fn release(&mut self, token: ReservationToken) {
        if let Some(slot) = self.slot_mut(token.handle) {
            if slot.occupancy == Occupancy::Reserved(token.symbol) {
                slot.occupancy = Occupancy::Free;
            }
        }
    }

    /// Return the instance bound to `symbol` to the free pool at `tick`.
    pub fn free(&mut self, symbol: &Symbol, tick: u32) -> Option<ExternHandle> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| matches!(&s.occupancy, Occupancy::Bound(b) if b == symbol))?;
        slot.occupancy = Occupancy::Free;
        slot.idle_since = tick;
        Some(slot.handle)
    }
}

/// Maps symbols to grid cells.
#[derive(Debug, Clone)]
pub struct Mapper {
    tree: ResourceTree,
    coords: FxHashMap<Symbol, Coord>,
    externs: ExternTable,
}

impl Mapper {
    /// Build the resource tree and extern table of a layout.
    pub fn new(qcb: &Qcb) -> Self {
        let mut tree = ResourceTree::build(qcb);

        let mut templates: Vec<&str> = Vec::new();
        for e in qcb.externs() {
            if !templates.contains(&e.template.as_str()) {
                templates.push(&e.template);
            }
        }
        let mut slots = Vec::new();
        for template in templates {
            let kind = SlotKind::Extern(template.to_string());
            while let Some(slot) = tree.alloc(&kind) {
                if let Some(handle) = slot.handle {
                    slots.push(ExternSlot {
                        handle,
                        template: template.to_string(),
                        port: slot.coord,
                        cycles: qcb.extern_instance(handle).map_or(0, |e| e.cycles),
                        idle_since: 0,
                        occupancy: Occupancy::Free,
                    });
                }
            }
        }

        Self {
            tree,
            coords: FxHashMap::default(),
            externs: ExternTable { slots },
        }
    }

    /// Map a register or I/O symbol to a free cell.
    ///
    /// Symbols that are already mapped keep their cell.
    pub fn allocate(&mut self, symbol: &Symbol) -> CompileResult<Coord> {
        if let Some(&c) = self.coords.get(symbol) {
            return Ok(c);
        }
        let kind = match symbol {
            Symbol::Io(_) => SlotKind::Io,
            Symbol::Register(_) => SlotKind::Register,
            Symbol::Extern { .. } => return Err(CompileError::UnmappedSymbol(symbol.clone())),
        };
        let slot = self.tree.alloc(&kind).ok_or_else(|| {
            CompileError::OutOfSlots(match kind {
                SlotKind::Io => "I/O".to_string(),
                _ => "register".to_string(),
            })
        })?;
        trace!("{symbol} -> {}", slot.coord);
        self.coords.insert(symbol.clone(), slot.coord);
        Ok(slot.coord)
    }

    /// Map every register and I/O symbol of a graph, in order of first use.
    #[instrument(skip(self, graph))]
    pub fn map_graph(&mut self, graph: &DependencyGraph) -> CompileResult<()> {
        for symbol in graph.symbols() {
            self.allocate(symbol)?;
        }
        debug!("Mapped {} symbols", self.coords.len());
        Ok(())
    }

    /// Pin a symbol to a specific cell.
    pub fn assign(&mut self, symbol: Symbol, coord: Coord) {
        self.tree.take(coord);
        self.coords.insert(symbol, coord);
    }

    /// Cell of a symbol: its mapped cell, or the port of the extern
    /// instance it is bound to.
    pub fn coordinate(&self, symbol: &Symbol) -> Option<Coord> {
        match symbol {
            Symbol::Extern { .. } => self.externs.binding(symbol).map(|s| s.port),
            _ => self.coords.get(symbol).copied(),
        }
    }

    /// Number of mapped register and I/O symbols.
    pub fn num_mapped(&self) -> usize {
        self.coords.len()
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn externs(&self) -> &ExternTable {
        &self.externs
    }

    pub fn externs_mut(&mut self) -> &mut ExternTable {
        &mut self.externs
    }
}

impl fmt::Display for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.coords.iter().collect();
        entries.sort();
        for (symbol, coord) in entries {
            writeln!(f, "{symbol} -> {coord}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Piece, Rect, SegmentId, SegmentSet, SegmentState};
    use arvak_surface_ir::{ExternTemplate, Gate};

    fn layout_with_extern() -> Qcb {
        // X X + .
        // X X + .
        // + + + .
        // # # # #
        let mut set = SegmentSet::new(4, 4);
        set.partition(
            SegmentId(0),
            vec![
                Piece::allocated(Rect::new(0, 0, 2, 2), SegmentState::Extern(ExternHandle(0))),
                Piece::allocated(Rect::new(0, 2, 2, 1), SegmentState::LocalRoute),
                Piece::allocated(Rect::new(2, 0, 1, 3), SegmentState::LocalRoute),
                Piece::free(Rect::new(0, 3, 3, 1)),
                Piece::allocated(Rect::new(3, 0, 1, 4), SegmentState::Route),
            ],
        )
        .unwrap();
        let mut qcb = Qcb::from_segments(set, 0);
        let seg = qcb.segments().segment_at(Coord::new(0, 0)).unwrap();
        qcb.add_extern(&ExternTemplate::new("T", 2, 2, 5), seg);
        qcb
    }

    #[test]
    fn test_reservation_lifecycle() {
        let mut mapper = Mapper::new(&layout_with_extern());
        assert_eq!(mapper.externs().slots().len(), 1);
        let t0 = Symbol::factory("T", 0);
        let t1 = Symbol::factory("T", 1);

        let token = mapper.externs_mut().try_reserve(&t0).unwrap();
        assert!(mapper.externs_mut().try_reserve(&t1).is_none());
        mapper.externs_mut().release(token);

        let token = mapper.externs_mut().try_reserve(&t1).unwrap();
        let handle = mapper.externs_mut().commit(token);
        assert_eq!(handle, ExternHandle(0));
        assert_eq!(mapper.coordinate(&t1), Some(Coord::new(1, 1)));
        assert!(mapper.externs_mut().try_reserve(&t1).is_none());
        assert!(mapper.externs_mut().try_reserve(&t0).is_none());

        assert_eq!(mapper.externs_mut().free(&t1, 7), Some(handle));
        assert_eq!(mapper.coordinate(&t1), None);
        assert_eq!(mapper.externs().idle_since(handle), Some(7));
        assert!(mapper.externs_mut().try_reserve(&t0).is_some());
    }

    #[test]
    fn test_reserve_named_instance() {
        let qcb = layout_with_extern();
        let mut table = ExternTable::from_qcb(&qcb);
        assert_eq!(table.len(), 1);
        let t0 = Symbol::factory("T", 0);

        assert!(table.try_reserve_handle(&t0, ExternHandle(4)).is_none());
        let token = table.try_reserve_handle(&t0, ExternHandle(0)).unwrap();
        assert_eq!(token.handle(), ExternHandle(0));
        assert!(table.try_reserve_handle(&t0, ExternHandle(0)).is_none());
        table.commit(token);
        assert_eq!(table.binding(&t0).map(|s| s.cycles), Some(5));
    }

    #[test]
    fn test_map_graph() {
        let mut set = SegmentSet::new(2, 3);
        set.partition(
            SegmentId(0),
            vec![
                Piece::allocated(Rect::new(0, 0, 1, 3), SegmentState::Register),
                Piece::allocated(Rect::new(1, 0, 1, 3), SegmentState::Route),
            ],
        )
        .unwrap();
        let qcb = Qcb::from_segments(set, 0);

        let mut g = DependencyGraph::new();
        g.add_gate(Gate::non_local(
            "cx",
            [Symbol::register("a"), Symbol::register("b")],
            1,
        ))
        .unwrap();

        let mut mapper = Mapper::new(&qcb);
        mapper.assign(Symbol::register("b"), Coord::new(0, 0));
        mapper.map_graph(&g).unwrap();
        assert_eq!(mapper.coordinate(&Symbol::register("b")), Some(Coord::new(0, 0)));
        let a = mapper.coordinate(&Symbol::register("a")).unwrap();
        assert_ne!(a, Coord::new(0, 0));
        assert_eq!(mapper.num_mapped(), 2);

        assert!(matches!(
            mapper.allocate(&Symbol::io("x")),
            Err(CompileError::OutOfSlots(_))
        ));
    }
}
