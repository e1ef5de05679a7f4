//! Dependency graph consumed by the backend.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex as PetNodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::gate::Gate;
use crate::symbol::Symbol;

/// Node index type for the dependency graph.
pub type NodeIndex = PetNodeIndex<u32>;

/// A gate together with its position in the layering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateNode {
    /// The gate.
    pub gate: Gate,
    /// `1 + max(layer of predicates)`, or 0 without predicates.
    pub layer: u32,
}

/// Dependency graph over gates.
///
/// Gates are appended in program order. Each gate depends on the most
/// recent earlier gate on each of its operands, so edges follow the
/// operand chains. The result is a DAG, not necessarily a tree.
///
/// Edges always point from a lower node index to a higher one, which lets
/// analyses walk the graph in index order instead of sorting.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// The underlying graph; edges point from predicate to antecedent.
    graph: DiGraph<GateNode, (), u32>,
    /// Most recent gate on each symbol.
    last_on: FxHashMap<Symbol, NodeIndex>,
    /// Register and I/O symbols in order of first appearance.
    symbols: Vec<Symbol>,
    /// Extern templates in order of first appearance.
    templates: Vec<String>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a gate after every gate already in the graph.
    pub fn add_gate(&mut self, gate: Gate) -> IrResult<NodeIndex> {
        if gate.operands.is_empty() {
            return Err(IrError::EmptyOperands {
                gate_name: gate.name,
            });
        }
        if gate.cycles == 0 {
            return Err(IrError::ZeroCycles(gate.name));
        }
        if gate.is_reset() && (gate.operands.len() != 1 || !gate.operands[0].is_extern()) {
            return Err(IrError::InvalidReset(gate.operands));
        }

        let mut seen = FxHashSet::default();
        for symbol in &gate.operands {
            if !seen.insert(symbol) {
                return Err(IrError::DuplicateOperand {
                    symbol: symbol.clone(),
                    gate_name: gate.name.clone(),
                });
            }
        }

        let mut predicates: Vec<NodeIndex> = gate
            .operands
            .iter()
            .filter_map(|s| self.last_on.get(s).copied())
            .collect();
        predicates.sort_unstable();
        predicates.dedup();

        let layer = predicates
            .iter()
            .map(|&p| self.graph[p].layer + 1)
            .max()
            .unwrap_or(0);

        for symbol in &gate.operands {
            if !self.last_on.contains_key(symbol) {
                match symbol.template() {
                    Some(template) => {
                        if !self.templates.iter().any(|t| t == template) {
                            self.templates.push(template.to_string());
                        }
                    }
                    None => self.symbols.push(symbol.clone()),
                }
            }
        }

        let operands = gate.operands.clone();
        let node = self.graph.add_node(GateNode { gate, layer });
        for pred in predicates {
            self.graph.add_edge(pred, node, ());
        }
        for symbol in operands {
            self.last_on.insert(symbol, node);
        }

        Ok(node)
    }

    /// Number of gates.
    pub fn num_gates(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if the graph has no gates.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get a node.
    pub fn node(&self, node: NodeIndex) -> Option<&GateNode> {
        self.graph.node_weight(node)
    }

    /// Get a gate.
    pub fn gate(&self, node: NodeIndex) -> Option<&Gate> {
        self.graph.node_weight(node).map(|n| &n.gate)
    }

    /// Layer of a node.
    pub fn layer(&self, node: NodeIndex) -> IrResult<u32> {
        self.node(node).map(|n| n.layer).ok_or(IrError::InvalidNode)
    }

    /// All node indices in program order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Gates this node waits on, in index order.
    pub fn predicates(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(node, Direction::Incoming)
    }

    /// Gates waiting on this node, in index order.
    pub fn antecedents(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.sorted_neighbors(node, Direction::Outgoing)
    }

    /// Number of predicates of a node.
    pub fn num_predicates(&self, node: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(node, Direction::Incoming)
            .count()
    }

    fn sorted_neighbors(&self, node: NodeIndex, dir: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<_> = self.graph.neighbors_directed(node, dir).collect();
        out.sort_unstable();
        out
    }

    /// Gates without predicates, in index order.
    pub fn roots(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| self.num_predicates(n) == 0)
            .collect()
    }

    /// Gates grouped by layer.
    pub fn layers(&self) -> Vec<Vec<NodeIndex>> {
        let mut layers: Vec<Vec<NodeIndex>> = vec![Vec::new(); self.depth()];
        for node in self.graph.node_indices() {
            layers[self.graph[node].layer as usize].push(node);
        }
        layers
    }

    /// Number of layers.
    pub fn depth(&self) -> usize {
        self.graph
            .node_weights()
            .map(|n| n.layer as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Slack of every node, indexed by `NodeIndex::index()`.
    ///
    /// Slack is the number of layers a gate can slip without lengthening the
    /// critical path: `depth - 1 - layer - tail`, where `tail` is the longest
    /// chain of antecedents below the gate. Critical gates have slack 0.
    #[allow(clippy::cast_possible_truncation)]
    pub fn slacks(&self) -> Vec<u32> {
        let n = self.graph.node_count();
        let mut tail = vec![0_u32; n];
        for idx in (0..n).rev() {
            let node = NodeIndex::new(idx);
            let longest = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|s| tail[s.index()] + 1)
                .max()
                .unwrap_or(0);
            tail[idx] = longest;
        }
        let critical = (self.depth() as u32).saturating_sub(1);
        (0..n)
            .map(|idx| {
                let layer = self.graph[NodeIndex::new(idx)].layer;
                critical - layer - tail[idx]
            })
            .collect()
    }

    /// Slack of one node. Computes the full table; prefer [`slacks`](Self::slacks)
    /// in loops.
    pub fn slack(&self, node: NodeIndex) -> IrResult<u32> {
        self.slacks()
            .get(node.index())
            .copied()
            .ok_or(IrError::InvalidNode)
    }

    /// Register and I/O symbols in order of first appearance.
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of register symbols.
    pub fn num_registers(&self) -> usize {
        self.symbols.iter().filter(|s| !s.is_io()).count()
    }

    /// Number of I/O symbols.
    pub fn num_io(&self) -> usize {
        self.symbols.iter().filter(|s| s.is_io()).count()
    }

    /// Extern templates required by the graph, in order of first appearance.
    pub fn extern_templates(&self) -> &[String] {
        &self.templates
    }
}
