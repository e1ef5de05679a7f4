//! DAG scheduler.
//!
//! A discrete-event simulation of the dependency graph on an abstract
//! machine with `n_channels` routing channels and a fixed pool of extern
//! instances. It ignores geometry: the placement optimiser uses it to score
//! layouts, and the router uses its start ticks to order admissions and its
//! factory bindings to pick extern instances.
//!
//! Greedy admission can finish later with more channels: starting a gate the
//! moment a channel frees up may push back the chain that decides the total.
//! [`Scheduler::run`] therefore simulates every cap from one channel up to
//! the budget and keeps the fastest, so a larger budget is never slower.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use arvak_surface_ir::{DependencyGraph, Gate, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::error::{CompileError, CompileResult};
use crate::geometry::ExternHandle;
use crate::mapper::ExternTable;

/// Result of scheduling a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Tick at which the last gate completes.
    pub cycles: u32,
    /// Channel cap of the simulation that produced this schedule.
    pub channels: usize,
    /// Gates grouped by start tick.
    pub layers: Vec<Vec<NodeIndex>>,
    start: Vec<u32>,
    end: Vec<u32>,
    bindings: Vec<Option<ExternHandle>>,
}

impl Schedule {
    /// Start tick of a gate.
    pub fn start(&self, node: NodeIndex) -> Option<u32> {
        self.start.get(node.index()).copied()
    }

    /// Completion tick of a gate.
    pub fn end(&self, node: NodeIndex) -> Option<u32> {
        self.end.get(node.index()).copied()
    }

    /// Extern instance a gate bound its handle to, if the gate was the
    /// first user of an unbound handle.
    pub fn binding(&self, node: NodeIndex) -> Option<ExternHandle> {
        self.bindings.get(node.index()).copied().flatten()
    }

    /// Number of scheduled gates.
    pub fn num_gates(&self) -> usize {
        self.start.len()
    }
}

/// Schedules a dependency graph.
pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
    n_channels: usize,
    externs: ExternTable,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler for the given channel budget and no externs.
    pub fn new(graph: &'a DependencyGraph, n_channels: usize) -> Self {
        Self {
            graph,
            n_channels: n_channels.max(1),
            externs: ExternTable::default(),
        }
    }

    /// Bind factories through `externs`.
    #[must_use]
    pub fn with_externs(mut self, externs: ExternTable) -> Self {
        self.externs = externs;
        self
    }

    /// Run the simulation.
    ///
    /// Every cap from one channel to the budget is simulated and the
    /// fastest schedule is kept; ties go to the larger cap. Caps beyond the
    /// number of non-local gates cannot change the outcome and are skipped.
    #[instrument(skip(self), fields(gates = self.graph.num_gates(), channels = self.n_channels))]
    pub fn run(self) -> CompileResult<Schedule> {
        let graph = self.graph;
        let non_local = graph
            .node_indices()
            .filter(|&node| graph.gate(node).is_some_and(Gate::is_non_local))
            .count();
        let widest = self.n_channels.min(non_local).max(1);

        let mut best: Option<Schedule> = None;
        let mut failure = None;
        for channels in 1..=widest {
            match self.simulate(channels) {
                Ok(schedule) => {
                    if best.as_ref().is_none_or(|b| schedule.cycles <= b.cycles) {
                        best = Some(schedule);
                    }
                }
                Err(e) => failure = Some(e),
            }
        }

        match (best, failure) {
            (Some(schedule), _) => {
                debug!(
                    "Scheduled {} gates in {} cycles on {} channels",
                    graph.num_gates(),
                    schedule.cycles,
                    schedule.channels
                );
                Ok(schedule)
            }
            (None, Some(e)) => Err(e),
            (None, None) => Err(CompileError::Deadlock {
                cycle: 0,
                waiting: graph.num_gates(),
            }),
        }
    }

    /// One simulation with at most `channels` non-local gates in flight.
    ///
    /// Waiting gates are admitted in order of slack, then node index. Local
    /// gates are always admitted; non-local gates only while fewer than
    /// `channels` are active; gates on an unbound extern handle need a free
    /// instance of its template.
    fn simulate(&self, channels: usize) -> CompileResult<Schedule> {
        let graph = self.graph;
        let n = graph.num_gates();
        let slacks = graph.slacks();
        let mut externs = self.externs.clone();

        let mut pending: Vec<usize> = graph
            .node_indices()
            .map(|node| graph.num_predicates(node))
            .collect();
        let mut waiting: BTreeSet<(u32, NodeIndex)> = graph
            .roots()
            .into_iter()
            .map(|node| (slacks[node.index()], node))
            .collect();
        let mut active: BinaryHeap<Reverse<(u32, NodeIndex)>> = BinaryHeap::new();
        let mut active_non_local = 0;
        let mut start = vec![0; n];
        let mut end = vec![0; n];
        let mut bindings = vec![None; n];
        let mut layers: Vec<Vec<NodeIndex>> = Vec::new();
        let mut done = 0;
        let mut t = 0;

        while done < n {
            let candidates: Vec<(u32, NodeIndex)> = waiting.iter().copied().collect();
            for key in candidates {
                let node = key.1;
                let Some(gate) = graph.gate(node) else {
                    continue;
                };
                if gate.is_non_local() && active_non_local >= channels {
                    continue;
                }
                let Some((duration, binding)) = admit(&mut externs, gate, t) else {
                    continue;
                };
                waiting.remove(&key);
                start[node.index()] = t;
                end[node.index()] = t + duration;
                bindings[node.index()] = binding;
                let tick = t as usize;
                if layers.len() <= tick {
                    layers.resize_with(tick + 1, Vec::new);
                }
                layers[tick].push(node);
                active.push(Reverse((t + duration, node)));
                if gate.is_non_local() {
                    active_non_local += 1;
                }
            }

            let Some(&Reverse((next, _))) = active.peek() else {
                return Err(CompileError::Deadlock {
                    cycle: t,
                    waiting: waiting.len(),
                });
            };
            t = next;

            while let Some(&Reverse((e, node))) = active.peek() {
                if e != t {
                    break;
                }
                active.pop();
                done += 1;
                let Some(gate) = graph.gate(node) else {
                    continue;
                };
                if gate.is_non_local() {
                    active_non_local -= 1;
                }
                if gate.is_reset() {
                    if let Some(symbol) = gate.extern_operand() {
                        externs.free(symbol, t);
                    }
                }
                for succ in graph.antecedents(node) {
                    let left = &mut pending[succ.index()];
                    *left -= 1;
                    if *left == 0 {
                        waiting.insert((slacks[succ.index()], succ));
                    }
                }
            }
        }

        let cycles = end.iter().copied().max().unwrap_or(0);
        layers.resize_with(cycles as usize, Vec::new);
        trace!("{channels} channels: {cycles} cycles");
        Ok(Schedule {
            cycles,
            channels,
            layers,
            start,
            end,
            bindings,
        })
    }
}

/// Bind the extern operand of `gate` if needed. Returns the gate's duration
/// and the instance it bound, or `None` if no instance is free.
fn admit(externs: &mut ExternTable, gate: &Gate, t: u32) -> Option<(u32, Option<ExternHandle>)> {
    let cycles = gate.cycles.max(1);
    let Some(symbol) = gate.extern_operand() else {
        return Some((cycles, None));
    };
    if gate.is_reset() || externs.binding(symbol).is_some() {
        return Some((cycles, None));
    }

    let token = externs.try_reserve(symbol)?;
    let handle = externs.commit(token);
    trace!("{symbol} bound to {handle} at {t}");

    if gate.is_factory() {
        // the instance kept producing while idle
        let idle = externs.idle_since(handle).unwrap_or(t);
        let prewarm = t.saturating_sub(idle).min(cycles);
        Some(((cycles - prewarm).max(1), Some(handle)))
    } else {
        Some((cycles, Some(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, Piece, Qcb, Rect, SegmentId, SegmentSet, SegmentState};
    use arvak_surface_ir::{ExternTemplate, Symbol};

    fn q(name: &str) -> Symbol {
        Symbol::register(name)
    }

    /// `n` one-cell instances of a four-cycle template `T` above a routing row.
    fn instances(n: u32) -> ExternTable {
        let mut set = SegmentSet::new(2, n);
        let mut pieces: Vec<Piece> = (0..n)
            .map(|x| {
                Piece::allocated(Rect::new(0, x, 1, 1), SegmentState::Extern(ExternHandle(x)))
            })
            .collect();
        pieces.push(Piece::allocated(Rect::new(1, 0, 1, n), SegmentState::Route));
        set.partition(SegmentId(0), pieces).unwrap();
        let mut qcb = Qcb::from_segments(set, 0);
        let template = ExternTemplate::new("T", 1, 1, 4);
        for x in 0..n {
            let seg = qcb.segments().segment_at(Coord::new(0, x)).unwrap();
            qcb.add_extern(&template, seg);
        }
        ExternTable::from_qcb(&qcb)
    }

    #[test]
    fn test_empty_graph() {
        let g = DependencyGraph::new();
        let s = Scheduler::new(&g, 1).run().unwrap();
        assert_eq!(s.cycles, 0);
        assert!(s.layers.is_empty());
    }

    #[test]
    fn test_chain_timing() {
        let mut g = DependencyGraph::new();
        let h = g.add_gate(Gate::local("h", q("a"), 1)).unwrap();
        let cx = g.add_gate(Gate::non_local("cx", [q("a"), q("b")], 2)).unwrap();
        let s = Scheduler::new(&g, 1).run().unwrap();
        assert_eq!(s.start(h), Some(0));
        assert_eq!(s.start(cx), Some(1));
        assert_eq!(s.end(cx), Some(3));
        assert_eq!(s.cycles, 3);
        assert_eq!(s.layers.len(), 3);
        assert_eq!(s.layers[1], vec![cx]);
    }

    #[test]
    fn test_channel_budget() {
        let mut g = DependencyGraph::new();
        g.add_gate(Gate::non_local("cx", [q("a"), q("b")], 3)).unwrap();
        g.add_gate(Gate::non_local("cx", [q("c"), q("d")], 3)).unwrap();
        g.add_gate(Gate::local("h", q("e"), 3)).unwrap();

        let one = Scheduler::new(&g, 1).run().unwrap();
        let two = Scheduler::new(&g, 2).run().unwrap();
        assert_eq!(one.cycles, 6);
        assert_eq!(two.cycles, 3);
    }

    #[test]
    fn test_fastest_cap_is_kept() {
        let mut g = DependencyGraph::new();
        for (a, b) in [("a", "b"), ("c", "d"), ("e", "f")] {
            g.add_gate(Gate::non_local("cx", [q(a), q(b)], 2)).unwrap();
        }
        let s = Scheduler::new(&g, 8).run().unwrap();
        // more than three channels can never be in use at once
        assert_eq!(s.channels, 3);
        assert_eq!(s.cycles, 2);
    }

    #[test]
    fn test_binding_recorded() {
        let t = Symbol::factory("T", 0);
        let mut g = DependencyGraph::new();
        let make = g.add_gate(Gate::factory(t.clone(), 4)).unwrap();
        let use_ = g
            .add_gate(Gate::non_local("inject", [q("a"), t.clone()], 1))
            .unwrap();
        g.add_gate(Gate::reset(t)).unwrap();

        let s = Scheduler::new(&g, 1).with_externs(instances(2)).run().unwrap();
        assert_eq!(s.binding(make), Some(ExternHandle(0)));
        assert_eq!(s.binding(use_), None);
    }

    #[test]
    fn test_low_slack_first() {
        let mut g = DependencyGraph::new();
        let loose = g.add_gate(Gate::non_local("cx", [q("a"), q("b")], 1)).unwrap();
        let tight = g.add_gate(Gate::non_local("cx", [q("c"), q("d")], 1)).unwrap();
        g.add_gate(Gate::local("h", q("c"), 1)).unwrap();

        let s = Scheduler::new(&g, 1).run().unwrap();
        assert_eq!(s.start(tight), Some(0));
        assert_eq!(s.start(loose), Some(1));
    }

    fn factory_reuse_graph() -> DependencyGraph {
        let t = Symbol::factory("T", 0);
        let mut g = DependencyGraph::new();
        g.add_gate(Gate::factory(t.clone(), 4)).unwrap();
        g.add_gate(Gate::non_local("inject", [q("a"), t.clone()], 1))
            .unwrap();
        g.add_gate(Gate::reset(t.clone())).unwrap();
        g.add_gate(Gate::factory(t, 4)).unwrap();
        g
    }

    #[test]
    fn test_factory_prewarm() {
        let g = factory_reuse_graph();
        // factory [0,4), inject [4,5), reset [5,6), then a fresh factory
        let single = Scheduler::new(&g, 1).with_externs(instances(1)).run().unwrap();
        assert_eq!(single.cycles, 10);
        // the second instance has been idle since 0 and is fully warm
        let double = Scheduler::new(&g, 1).with_externs(instances(2)).run().unwrap();
        assert_eq!(double.cycles, 7);
    }

    #[test]
    fn test_extern_exclusive() {
        let mut g = DependencyGraph::new();
        let t0 = Symbol::factory("T", 0);
        let t1 = Symbol::factory("T", 1);
        g.add_gate(Gate::factory(t0.clone(), 4)).unwrap();
        g.add_gate(Gate::reset(t0)).unwrap();
        let second = g.add_gate(Gate::factory(t1, 4)).unwrap();

        let s = Scheduler::new(&g, 1).with_externs(instances(1)).run().unwrap();
        assert_eq!(s.start(second), Some(5));
    }

    #[test]
    fn test_deadlock_without_reset() {
        let mut g = DependencyGraph::new();
        g.add_gate(Gate::factory(Symbol::factory("T", 0), 2)).unwrap();
        g.add_gate(Gate::factory(Symbol::factory("T", 1), 2)).unwrap();
        let err = Scheduler::new(&g, 1).with_externs(instances(1)).run().unwrap_err();
        assert!(matches!(
            err,
            CompileError::Deadlock {
                cycle: 2,
                waiting: 1
            }
        ));
    }
}
