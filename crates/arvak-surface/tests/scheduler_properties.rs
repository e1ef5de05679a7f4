//! Property-based tests for the DAG scheduler.

use arvak_surface::Scheduler;
use arvak_surface_ir::{DependencyGraph, Gate, Symbol};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum GateOp {
    Local(u32, u32),
    Pair(u32, u32, u32),
}

fn arb_op(num_qubits: u32, max_cycles: u32) -> impl Strategy<Value = GateOp> {
    prop_oneof![
        (0..num_qubits, 1..=max_cycles).prop_map(|(q, c)| GateOp::Local(q, c)),
        (0..num_qubits, 0..num_qubits, 1..=max_cycles)
            .prop_filter("distinct operands", |(a, b, _)| a != b)
            .prop_map(|(a, b, c)| GateOp::Pair(a, b, c)),
    ]
}

fn arb_graph() -> impl Strategy<Value = DependencyGraph> {
    arb_graph_with(40, 3)
}

fn arb_graph_with(max_gates: usize, max_cycles: u32) -> impl Strategy<Value = DependencyGraph> {
    (2_u32..=8).prop_flat_map(move |n| {
        prop::collection::vec(arb_op(n, max_cycles), 1..=max_gates).prop_map(|ops| {
            let reg = |q: u32| Symbol::register(format!("q{q}"));
            let mut graph = DependencyGraph::new();
            for op in ops {
                let gate = match op {
                    GateOp::Local(q, c) => Gate::local("u", reg(q), c),
                    GateOp::Pair(a, b, c) => Gate::non_local("cx", [reg(a), reg(b)], c),
                };
                graph.add_gate(gate).unwrap();
            }
            graph
        })
    })
}

proptest! {
    #[test]
    fn schedule_respects_dependencies_and_channels(
        graph in arb_graph(),
        channels in 1_usize..4,
    ) {
        let schedule = Scheduler::new(&graph, channels).run().unwrap();

        let mut busy = vec![0_usize; schedule.cycles as usize];
        for node in graph.node_indices() {
            let start = schedule.start(node).unwrap();
            let end = schedule.end(node).unwrap();
            let gate = graph.gate(node).unwrap();
            prop_assert_eq!(end - start, gate.cycles);
            prop_assert!(start >= graph.layer(node).unwrap());
            prop_assert!(schedule.layers[start as usize].contains(&node));
            for pred in graph.predicates(node) {
                prop_assert!(schedule.end(pred).unwrap() <= start);
            }
            if gate.is_non_local() {
                for tick in start..end {
                    busy[tick as usize] += 1;
                }
            }
        }
        prop_assert!(busy.iter().all(|&b| b <= channels));

        let last = graph.node_indices().filter_map(|n| schedule.end(n)).max();
        prop_assert_eq!(Some(schedule.cycles), last);
    }

    #[test]
    fn extra_channel_never_slower(
        graph in arb_graph_with(30, 5),
        channels in 1_usize..5,
    ) {
        let narrow = Scheduler::new(&graph, channels).run().unwrap();
        let wide = Scheduler::new(&graph, channels + 1).run().unwrap();
        prop_assert!(
            wide.cycles <= narrow.cycles,
            "{} channels: {} cycles, {} channels: {} cycles",
            channels,
            narrow.cycles,
            channels + 1,
            wide.cycles
        );
        prop_assert!(narrow.channels <= channels);
    }

    #[test]
    fn schedule_is_deterministic(graph in arb_graph()) {
        let a = Scheduler::new(&graph, 2).run().unwrap();
        let b = Scheduler::new(&graph, 2).run().unwrap();
        prop_assert_eq!(a, b);
    }
}
