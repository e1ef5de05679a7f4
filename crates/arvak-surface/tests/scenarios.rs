//! End-to-end compilation scenarios.

use arvak_surface::{
    AllocatorError, CompileError, CompilerConfig, Coord, Mapper, PassManagerBuilder, PropertySet,
    Qcb, Router, RouterConfig, Scheduler, SegmentId, SegmentSet, SegmentState, compile,
    geometry::{Piece, Rect},
};
use arvak_surface_ir::{DependencyGraph, ExternTemplate, Gate, Symbol};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn q(i: usize) -> Symbol {
    Symbol::register(format!("q{i}"))
}

/// Six registers, fifteen gates: a layer of Hadamards, then chained
/// two-qubit gates with a few local gates in between.
fn fifteen_gates() -> DependencyGraph {
    let mut g = DependencyGraph::new();
    for i in 0..6 {
        g.add_gate(Gate::local("h", q(i), 1)).unwrap();
    }
    for (a, b) in [(0, 1), (2, 3), (4, 5), (1, 2), (3, 4)] {
        g.add_gate(Gate::non_local("cx", [q(a), q(b)], 2)).unwrap();
    }
    g.add_gate(Gate::local("t", q(0), 1)).unwrap();
    g.add_gate(Gate::non_local("cx", [q(0), q(5)], 2)).unwrap();
    g.add_gate(Gate::local("h", q(2), 1)).unwrap();
    g.add_gate(Gate::non_local("cx", [q(2), q(3)], 2)).unwrap();
    assert_eq!(g.num_gates(), 15);
    g
}

#[test]
fn test_fifteen_gates_on_5x9() {
    init_tracing();
    let graph = fifteen_gates();
    let compiled = compile(&graph, &CompilerConfig::new(5, 9)).unwrap();

    assert!(compiled.n_cycles() > 0);
    assert_eq!(compiled.routing().routes.len(), 15);
    assert_eq!(
        compiled.space_time_volume(),
        45 * u64::from(compiled.n_cycles())
    );
    compiled.qcb().segments().check_invariants().unwrap();
    assert!(compiled.segments().count() > 1);

    // every gate starts after its predecessors finished
    for node in graph.node_indices() {
        let route = compiled.routing().route(node).unwrap();
        for pred in graph.predicates(node) {
            assert!(compiled.routing().route(pred).unwrap().end <= route.start);
        }
        assert!(compiled.gates_at(route.start).contains(&node));
    }
}

#[test]
fn test_extern_too_big() {
    init_tracing();
    let mut graph = DependencyGraph::new();
    let t = Symbol::factory("T", 0);
    graph.add_gate(Gate::factory(t.clone(), 4)).unwrap();
    graph
        .add_gate(Gate::non_local("inject", [q(0), t.clone()], 1))
        .unwrap();
    graph.add_gate(Gate::reset(t)).unwrap();

    let config = CompilerConfig::new(5, 9).with_extern(ExternTemplate::new("T", 6, 6, 4));
    let err = compile(&graph, &config).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Allocator(AllocatorError::ExternExhausted { .. })
    ));
}

#[test]
fn test_too_many_registers_for_2x2() {
    let mut graph = DependencyGraph::new();
    for i in 0..4 {
        graph.add_gate(Gate::local("h", q(i), 1)).unwrap();
    }
    let err = compile(&graph, &CompilerConfig::new(2, 2)).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Allocator(AllocatorError::InsufficientSlots {
            required: 4,
            available: 2,
            ..
        })
    ));
}

#[test]
fn test_extern_lifecycle() {
    init_tracing();
    let mut graph = DependencyGraph::new();
    let mut resets = Vec::new();
    for i in 0..2 {
        let t = Symbol::factory("T", i);
        graph.add_gate(Gate::factory(t.clone(), 5)).unwrap();
        graph
            .add_gate(Gate::non_local("inject", [q(i as usize), t.clone()], 1))
            .unwrap();
        resets.push(graph.add_gate(Gate::reset(t)).unwrap());
    }

    let config = CompilerConfig::new(6, 10)
        .with_extern(ExternTemplate::new("T", 2, 2, 5))
        .with_optimise(false);
    let compiled = compile(&graph, &config).unwrap();
    assert_eq!(compiled.qcb().externs().len(), 1);

    // one instance: the second factory waits for the first reset
    let first_reset = compiled.routing().route(resets[0]).unwrap();
    let second = Symbol::factory("T", 1);
    let second_factory = compiled
        .routing()
        .routes
        .iter()
        .find(|r| {
            graph
                .gate(r.gate)
                .is_some_and(|g| g.is_factory() && g.operands[0] == second)
        })
        .unwrap();
    assert!(second_factory.start >= first_reset.end);
}

/// Row 0: `width` registers; row 1: one routing lane; row 2: unused.
fn lane(width: u32) -> Qcb {
    let mut set = SegmentSet::new(3, width);
    let mut pieces: Vec<Piece> = (0..width)
        .map(|x| Piece::allocated(Rect::new(0, x, 1, 1), SegmentState::Register))
        .collect();
    pieces.push(Piece::allocated(Rect::new(1, 0, 1, width), SegmentState::Route));
    pieces.push(Piece::free(Rect::new(2, 0, 1, width)));
    set.partition(SegmentId(0), pieces).unwrap();
    Qcb::from_segments(set, 0)
}

fn pin_row(qcb: &Qcb, symbols: impl IntoIterator<Item = Symbol>) -> Mapper {
    let mut mapper = Mapper::new(qcb);
    for (x, s) in symbols.into_iter().enumerate() {
        mapper.assign(s, Coord::new(0, x as u32));
    }
    mapper
}

#[test]
fn test_shared_lane_defers_second_gate() {
    init_tracing();
    let qcb = lane(4);
    let mut graph = DependencyGraph::new();
    let first = graph
        .add_gate(Gate::non_local("cx", [q(0), q(2)], 3))
        .unwrap();
    let second = graph
        .add_gate(Gate::non_local("cx", [q(1), q(3)], 3))
        .unwrap();
    let mut mapper = pin_row(&qcb, (0..4).map(q));

    // the abstract schedule overlaps them; the lane does not
    let schedule = Scheduler::new(&graph, 2).run().unwrap();
    assert_eq!(schedule.start(second), Some(0));

    let mut config = RouterConfig::default();
    config.teleport.enabled = false;
    let routing = Router::new(&graph, &qcb, &mut mapper, &schedule, &config)
        .run()
        .unwrap();
    let r1 = routing.route(first).unwrap();
    let r2 = routing.route(second).unwrap();
    assert_eq!(r1.start, 0);
    assert_eq!(r2.start, r1.end);
    assert_eq!(routing.cycles, 6);
}

#[test]
fn test_long_route_holds_its_corridor() {
    init_tracing();
    let qcb = lane(8);
    let mut graph = DependencyGraph::new();
    let long = graph
        .add_gate(Gate::non_local("cx", [q(0), q(7)], 4))
        .unwrap();
    let short = graph
        .add_gate(Gate::non_local("cx", [q(1), q(2)], 1))
        .unwrap();
    let mut mapper = pin_row(&qcb, (0..8).map(q));

    let schedule = Scheduler::new(&graph, 2).run().unwrap();
    assert_eq!(schedule.start(short), Some(0));

    // teleportation stays on, but an unbranched lane has no switches
    let config = RouterConfig::default();
    let routing = Router::new(&graph, &qcb, &mut mapper, &schedule, &config)
        .run()
        .unwrap();
    let r1 = routing.route(long).unwrap();
    let r2 = routing.route(short).unwrap();
    assert!(r1.teleports.is_empty());
    assert_eq!(r2.start, r1.end);
    assert_eq!(routing.cycles, 5);
}

#[test]
fn test_pipeline_with_pinned_layout() {
    let mut graph = DependencyGraph::new();
    graph
        .add_gate(Gate::non_local("cx", [q(0), q(3)], 2))
        .unwrap();

    let qcb = lane(4);
    let mut mapper = Mapper::new(&qcb);
    mapper.assign(q(0), Coord::new(0, 0));
    let mut props = PropertySet::new().with_config(CompilerConfig::new(3, 4));
    props.qcb = Some(qcb);
    props.mapper = Some(mapper);

    let (pm, mut props) = PassManagerBuilder::new().with_properties(props).build();
    pm.run(&graph, &mut props).unwrap();

    let mapper = props.mapper.as_ref().unwrap();
    assert_eq!(mapper.coordinate(&q(0)), Some(Coord::new(0, 0)));
    assert!(mapper.coordinate(&q(3)).is_some());
    assert_eq!(props.routing.as_ref().map(|r| r.cycles), Some(2));
}

#[test]
fn test_second_channel_relieves_contention() {
    // every layer holds two independent non-local gates
    let mut graph = DependencyGraph::new();
    for _ in 0..3 {
        graph
            .add_gate(Gate::non_local("cx", [q(0), q(1)], 2))
            .unwrap();
        graph
            .add_gate(Gate::non_local("cx", [q(2), q(3)], 2))
            .unwrap();
    }
    let one = Scheduler::new(&graph, 1).run().unwrap();
    let two = Scheduler::new(&graph, 2).run().unwrap();
    assert_eq!(one.cycles, 12);
    assert_eq!(two.cycles, 6);

    let wide = Scheduler::new(&fifteen_gates(), 2).run().unwrap();
    let narrow = Scheduler::new(&fifteen_gates(), 1).run().unwrap();
    assert!(wide.cycles <= narrow.cycles);
}

#[test]
fn test_locks_are_exclusive() {
    let graph = fifteen_gates();
    let compiled = compile(&graph, &CompilerConfig::new(5, 9)).unwrap();
    let routing = compiled.routing();

    // only a switch joined by a compound teleport may have two holders
    let joined = |c: Coord, from: u32| {
        routing
            .teleports
            .iter()
            .any(|tp| tp.gates.len() > 1 && tp.from == from && tp.endpoints.contains(&c))
    };
    for (i, r1) in routing.routes.iter().enumerate() {
        for r2 in &routing.routes[i + 1..] {
            for l1 in &r1.locks {
                for l2 in &r2.locks {
                    let overlap = l1.from < l2.until && l2.from < l1.until;
                    let same_window = (l1.from, l1.until) == (l2.from, l2.until);
                    assert!(
                        l1.coord != l2.coord
                            || !overlap
                            || (same_window && joined(l1.coord, l1.from)),
                        "cell {} held twice",
                        l1.coord
                    );
                }
            }
        }
    }
}

#[test]
fn test_compilation_is_reproducible() {
    let graph = fifteen_gates();
    let config = CompilerConfig::new(5, 9);
    let a = compile(&graph, &config).unwrap();
    let b = compile(&graph, &config).unwrap();
    assert_eq!(a.routing(), b.routing());
    assert_eq!(a.schedule(), b.schedule());
    assert_eq!(a.qcb().render(), b.qcb().render());
}
