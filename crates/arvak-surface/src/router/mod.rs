//! Router.
//!
//! Replays the dependency graph on the cell grid of a layout. Every cycle,
//! finished gates release their locks, then ready gates are admitted in
//! order of scheduled start, slack and index. A non-local gate is admitted
//! only if A* finds a path between each consecutive pair of its operands
//! through routing cells that are free for the whole gate; otherwise it is
//! deferred to the next cycle and nothing it touched stays claimed.
//!
//! Long routes may teleport. Switches are routing cells where a corridor
//! branches. When a long route crosses two or more switches, the stretch
//! from its first to its last switch is bridged by a teleport held for a
//! single cycle, so crossing traffic can use it again. The rest of the
//! route is held for the whole gate. Teleports of different gates in the
//! same cycle that share a switch merge into one compound teleport.

mod astar;
mod patch;

pub use patch::{Lock, Orientation, PatchGrid, PatchNode};

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use arvak_surface_ir::{DependencyGraph, IrError, NodeIndex, Symbol};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::config::{RouterConfig, TeleportPolicy};
use crate::error::{CompileError, CompileResult};
use crate::geometry::{Coord, Qcb};
use crate::mapper::{Mapper, ReservationToken};
use crate::scheduler::Schedule;
use astar::{Relaxation, SearchRequest, find_path};

/// A stretch of corridor bridged in a single cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teleport {
    /// Gates whose routes use this teleport.
    pub gates: Vec<NodeIndex>,
    /// Switch cells the teleport connects, in path order.
    pub endpoints: Vec<Coord>,
    /// Every cell held for the teleport, endpoints included.
    pub cells: Vec<Coord>,
    pub from: u32,
    pub until: u32,
}

impl Teleport {
    fn shares_endpoint(&self, other: &Teleport) -> bool {
        self.from == other.from
            && self.until == other.until
            && self.endpoints.iter().any(|e| other.endpoints.contains(e))
    }

    fn absorb(&mut self, other: Teleport) {
        for gate in other.gates {
            if !self.gates.contains(&gate) {
                self.gates.push(gate);
            }
        }
        for e in other.endpoints {
            if !self.endpoints.contains(&e) {
                self.endpoints.push(e);
            }
        }
        for c in other.cells {
            if !self.cells.contains(&c) {
                self.cells.push(c);
            }
        }
    }
}

/// One cell held by a routed gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLock {
    pub coord: Coord,
    pub from: u32,
    pub until: u32,
}

/// How one gate was placed in time and space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub gate: NodeIndex,
    pub start: u32,
    pub end: u32,
    /// Operand patches and the routing cells between them, in order.
    pub path: Vec<Coord>,
    /// Teleports of this route alone, one per operand pair at most.
    pub teleports: Vec<Teleport>,
    pub locks: Vec<CellLock>,
}

/// Output of the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub cycles: u32,
    /// Routes in admission order.
    pub routes: Vec<RouteRecord>,
    /// Gates grouped by admission cycle.
    pub layers: Vec<Vec<NodeIndex>>,
    /// Teleports after merging those that share an endpoint.
    pub teleports: Vec<Teleport>,
}

impl RoutingResult {
    /// Route of one gate.
    pub fn route(&self, gate: NodeIndex) -> Option<&RouteRecord> {
        self.routes.iter().find(|r| r.gate == gate)
    }

    /// Routes active during cycle `t`.
    pub fn active_at(&self, t: u32) -> impl Iterator<Item = &RouteRecord> {
        self.routes.iter().filter(move |r| r.start <= t && t < r.end)
    }
}

/// Locks and teleports planned for one admission.
struct LockPlan {
    locks: Vec<CellLock>,
    teleports: Vec<Teleport>,
    /// Teleport endpoint cells and their windows.
    endpoints: Vec<CellLock>,
}

/// Routes a scheduled graph on a mapped layout.
pub struct Router<'a> {
    graph: &'a DependencyGraph,
    mapper: &'a mut Mapper,
    schedule: &'a Schedule,
    config: &'a RouterConfig,
    grid: PatchGrid,
    switches: FxHashSet<Coord>,
    teleports: Vec<Teleport>,
}

impl<'a> Router<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        qcb: &Qcb,
        mapper: &'a mut Mapper,
        schedule: &'a Schedule,
        config: &'a RouterConfig,
    ) -> Self {
        let grid = PatchGrid::new(qcb);
        let switches = grid
            .route_cells()
            .filter(|&c| grid.route_degree(c) >= config.teleport.min_switch_neighbours)
            .collect();
        Self {
            graph,
            mapper,
            schedule,
            config,
            grid,
            switches,
            teleports: Vec::new(),
        }
    }

    /// Lock grid after routing; locks of finished gates are gone.
    pub fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    /// Cells where a corridor branches.
    pub fn switches(&self) -> &FxHashSet<Coord> {
        &self.switches
    }

    /// Run the cycle loop until every gate has completed.
    #[instrument(skip(self), fields(gates = self.graph.num_gates()))]
    pub fn run(&mut self) -> CompileResult<RoutingResult> {
        let graph = self.graph;
        let n = graph.num_gates();
        let schedule = self.schedule;
        let slacks = graph.slacks();
        let order_key = |node: NodeIndex| {
            (
                schedule.start(node).unwrap_or(u32::MAX),
                slacks[node.index()],
                node,
            )
        };

        let mut pending: Vec<usize> = graph
            .node_indices()
            .map(|node| graph.num_predicates(node))
            .collect();
        let mut ready: BTreeSet<(u32, u32, NodeIndex)> =
            graph.roots().into_iter().map(order_key).collect();
        let mut active: BinaryHeap<Reverse<(u32, NodeIndex)>> = BinaryHeap::new();
        let mut routes: Vec<RouteRecord> = Vec::new();
        let mut layers: Vec<Vec<NodeIndex>> = Vec::new();
        let mut done = 0;
        let mut stalled = 0;
        let mut t = 0;

        while done < n {
            let mut progressed = false;

            while let Some(&Reverse((end, node))) = active.peek() {
                if end > t {
                    break;
                }
                active.pop();
                done += 1;
                progressed = true;
                self.complete(node, end);
                for succ in graph.antecedents(node) {
                    let left = &mut pending[succ.index()];
                    *left -= 1;
                    if *left == 0 {
                        ready.insert(order_key(succ));
                    }
                }
            }

            let candidates: Vec<(u32, u32, NodeIndex)> = ready.iter().copied().collect();
            for key in candidates {
                let node = key.2;
                let Some(record) = self.try_route(node, t)? else {
                    trace!("deferred {node:?} at {t}");
                    continue;
                };
                ready.remove(&key);
                active.push(Reverse((record.end, node)));
                let tick = t as usize;
                if layers.len() <= tick {
                    layers.resize_with(tick + 1, Vec::new);
                }
                layers[tick].push(node);
                routes.push(record);
                progressed = true;
            }

            if done == n {
                break;
            }
            match active.peek() {
                Some(&Reverse((end, _))) => {
                    stalled = 0;
                    t = self.grid.next_boundary(t).map_or(end, |b| b.min(end));
                }
                None => {
                    if progressed {
                        stalled = 0;
                    } else {
                        stalled += 1;
                    }
                    if stalled > self.config.deadlock_threshold {
                        warn!("No gate can be routed at cycle {t}");
                        return Err(CompileError::Deadlock {
                            cycle: t,
                            waiting: ready.len(),
                        });
                    }
                    t += 1;
                }
            }
        }

        let cycles = routes.iter().map(|r| r.end).max().unwrap_or(0);
        layers.resize_with(cycles as usize, Vec::new);
        debug!(
            "Routed {n} gates in {cycles} cycles with {} teleports",
            self.teleports.len()
        );
        Ok(RoutingResult {
            cycles,
            routes,
            layers,
            teleports: std::mem::take(&mut self.teleports),
        })
    }

    fn complete(&mut self, node: NodeIndex, t: u32) {
        self.grid.release(node);
        let graph = self.graph;
        let Some(gate) = graph.gate(node) else {
            return;
        };
        if gate.is_reset() {
            if let Some(symbol) = gate.extern_operand() {
                self.mapper.externs_mut().free(symbol, t);
            }
        }
    }

    fn rollback(&mut self, tokens: Vec<ReservationToken>) {
        for token in tokens {
            self.mapper.externs_mut().release(token);
        }
    }

    /// Reserve an instance for an unbound extern handle, preferring the one
    /// the schedule bound it to.
    fn reserve(&mut self, node: NodeIndex, symbol: &Symbol) -> Option<ReservationToken> {
        let externs = self.mapper.externs_mut();
        match self.schedule.binding(node) {
            Some(handle) => externs
                .try_reserve_handle(symbol, handle)
                .or_else(|| externs.try_reserve(symbol)),
            None => externs.try_reserve(symbol),
        }
    }

    /// Teleport endpoints of the given window that another teleport may
    /// join.
    fn shared_endpoints(&self, from: u32, until: u32) -> FxHashSet<Coord> {
        self.teleports
            .iter()
            .filter(|tp| tp.from == from && tp.until == until)
            .flat_map(|tp| tp.endpoints.iter().copied())
            .collect()
    }

    /// Try to admit `node` at cycle `t`. Commits locks and extern bindings
    /// only on success.
    fn try_route(&mut self, node: NodeIndex, t: u32) -> CompileResult<Option<RouteRecord>> {
        let graph = self.graph;
        let gate = graph
            .gate(node)
            .ok_or(CompileError::Ir(IrError::InvalidNode))?;
        let (from, until) = (t, t + gate.cycles.max(1));

        let mut tokens = Vec::new();
        let mut endpoints = Vec::with_capacity(gate.operands.len());
        for symbol in &gate.operands {
            if let Some(c) = self.mapper.coordinate(symbol) {
                endpoints.push(c);
            } else if symbol.is_extern() {
                if gate.is_reset() {
                    continue;
                }
                let reserved = self.reserve(node, symbol);
                let port = reserved
                    .as_ref()
                    .and_then(|tok| self.mapper.externs().port(tok.handle()));
                match (reserved, port) {
                    (Some(token), Some(port)) => {
                        endpoints.push(port);
                        tokens.push(token);
                    }
                    (token, _) => {
                        tokens.extend(token);
                        self.rollback(tokens);
                        return Ok(None);
                    }
                }
            } else {
                self.rollback(tokens);
                return Err(CompileError::UnmappedSymbol(symbol.clone()));
            }
        }

        if endpoints
            .iter()
            .any(|&c| !self.grid.is_free(c, from, until))
        {
            self.rollback(tokens);
            return Ok(None);
        }

        let window = self.teleport_window(from, until);
        let shared = self.shared_endpoints(window.0, window.1);
        let Some((path, interiors)) = self.search(&endpoints, from, until, &shared) else {
            self.rollback(tokens);
            return Ok(None);
        };

        let plan = self.plan_locks(node, &endpoints, &interiors, from, until);
        let blocked = plan
            .locks
            .iter()
            .any(|l| !self.grid.is_free(l.coord, l.from, l.until));
        // both ends of every teleport must be usable for its whole window
        let stranded = plan.endpoints.iter().any(|l| {
            !self.grid.is_free(l.coord, l.from, l.until) && !shared.contains(&l.coord)
        });
        if blocked || stranded {
            self.rollback(tokens);
            return Ok(None);
        }

        for token in tokens {
            self.mapper.externs_mut().commit(token);
        }
        for l in plan.locks.iter().chain(&plan.endpoints) {
            self.grid.lock(l.coord, node, l.from, l.until);
        }
        for teleport in &plan.teleports {
            self.merge_teleport(teleport.clone());
        }

        let mut locks = plan.locks;
        locks.extend(plan.endpoints);
        trace!(
            "admitted {} at {t}: {} cells, {} teleports",
            gate.name,
            path.len(),
            plan.teleports.len()
        );
        Ok(Some(RouteRecord {
            gate: node,
            start: from,
            end: until,
            path,
            teleports: plan.teleports,
            locks,
        }))
    }

    /// Add a teleport, merging it with every recorded teleport of the same
    /// window it shares an endpoint with.
    fn merge_teleport(&mut self, mut teleport: Teleport) {
        let mut i = 0;
        while i < self.teleports.len() {
            if self.teleports[i].shares_endpoint(&teleport) {
                let other = self.teleports.swap_remove(i);
                trace!(
                    "merged teleport of {:?} into {:?}",
                    teleport.gates, other.gates
                );
                let mut merged = other;
                merged.absorb(teleport);
                teleport = merged;
                i = 0;
            } else {
                i += 1;
            }
        }
        self.teleports.push(teleport);
    }

    fn teleport_window(&self, from: u32, until: u32) -> (u32, u32) {
        match self.config.teleport.policy {
            TeleportPolicy::Asap => (from, from + 1),
            TeleportPolicy::Alap => (until - 1, until),
        }
    }

    /// Paths between consecutive endpoints. Returns the full path and the
    /// interior routing cells of each leg.
    fn search(
        &self,
        endpoints: &[Coord],
        from: u32,
        until: u32,
        shared: &FxHashSet<Coord>,
    ) -> Option<(Vec<Coord>, Vec<Vec<Coord>>)> {
        let mut path: Vec<Coord> = endpoints.first().copied().into_iter().collect();
        let mut interiors = Vec::new();
        let mut blocked: FxHashSet<Coord> = endpoints.iter().copied().collect();
        let teleport = &self.config.teleport;
        let (relax_from, relax_until) = self.teleport_window(from, until);

        for pair in endpoints.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            blocked.remove(&a);
            blocked.remove(&b);
            let strict = SearchRequest {
                grid: &self.grid,
                from,
                until,
                blocked: &blocked,
                relaxed: None,
            };
            let leg = find_path(&strict, a, b).or_else(|| {
                if !teleport.enabled {
                    return None;
                }
                let relaxed = SearchRequest {
                    relaxed: Some(Relaxation {
                        switches: &self.switches,
                        shared,
                        from: relax_from,
                        until: relax_until,
                    }),
                    ..strict
                };
                find_path(&relaxed, a, b)
            })?;

            blocked.extend(leg.iter().copied());
            let interior: Vec<Coord> = leg[1..leg.len() - 1].to_vec();
            path.extend(leg.into_iter().skip(1));
            interiors.push(interior);
        }
        Some((path, interiors))
    }

    /// Lock intervals for a routed gate.
    ///
    /// On a long enough route, each leg that crosses two or more switches
    /// is bridged by one teleport from its first to its last switch: those
    /// cells are held for the teleport window only, with the two switches
    /// as endpoints. Every other cell is held for the whole gate.
    fn plan_locks(
        &self,
        node: NodeIndex,
        endpoints: &[Coord],
        interiors: &[Vec<Coord>],
        from: u32,
        until: u32,
    ) -> LockPlan {
        let teleport = &self.config.teleport;
        let route_len: usize = interiors.iter().map(Vec::len).sum();
        let teleporting = teleport.enabled && route_len >= teleport.min_route_length;
        let (tf, tu) = self.teleport_window(from, until);

        let mut plan = LockPlan {
            locks: endpoints
                .iter()
                .map(|&coord| CellLock { coord, from, until })
                .collect(),
            teleports: Vec::new(),
            endpoints: Vec::new(),
        };
        for interior in interiors {
            let switches: Vec<usize> = interior
                .iter()
                .enumerate()
                .filter(|(_, c)| self.switches.contains(c))
                .map(|(i, _)| i)
                .collect();
            let span = match (switches.first(), switches.last()) {
                (Some(&first), Some(&last)) if teleporting && first < last => Some((first, last)),
                _ => None,
            };

            for (i, &coord) in interior.iter().enumerate() {
                match span {
                    Some((first, last)) if i == first || i == last => {
                        plan.endpoints.push(CellLock {
                            coord,
                            from: tf,
                            until: tu,
                        });
                    }
                    Some((first, last)) if first < i && i < last => plan.locks.push(CellLock {
                        coord,
                        from: tf,
                        until: tu,
                    }),
                    _ => plan.locks.push(CellLock { coord, from, until }),
                }
            }

            if let Some((first, last)) = span {
                plan.teleports.push(Teleport {
                    gates: vec![node],
                    endpoints: switches.iter().map(|&i| interior[i]).collect(),
                    cells: interior[first..=last].to_vec(),
                    from: tf,
                    until: tu,
                });
            }
        }
        plan
    }
}
