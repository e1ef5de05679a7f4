//! Gates of the dependency graph.

use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

/// What a gate does to its extern binding, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    /// A fixed-cycle operation on its operands.
    Operation,
    /// Returns the extern instance bound to its operand to the idle pool.
    Reset,
}

/// A fixed-cycle operation on one or more operand symbols.
///
/// The backend does not interpret what the gate computes. It only needs the
/// operands, the cycle cost and whether an extern factory is involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gate {
    /// Display name.
    pub name: String,
    /// Operands, in routing order.
    pub operands: Vec<Symbol>,
    /// Number of cycles the gate occupies its resources.
    pub cycles: u32,
    /// Kind of gate.
    pub kind: GateKind,
}

impl Gate {
    /// Create a gate from its parts.
    pub fn new(
        name: impl Into<String>,
        operands: impl IntoIterator<Item = Symbol>,
        cycles: u32,
        kind: GateKind,
    ) -> Self {
        Self {
            name: name.into(),
            operands: operands.into_iter().collect(),
            cycles,
            kind,
        }
    }

    /// A single-operand operation.
    pub fn local(name: impl Into<String>, operand: Symbol, cycles: u32) -> Self {
        Self::new(name, [operand], cycles, GateKind::Operation)
    }

    /// A multi-operand operation that needs a routed path.
    pub fn non_local(
        name: impl Into<String>,
        operands: impl IntoIterator<Item = Symbol>,
        cycles: u32,
    ) -> Self {
        Self::new(name, operands, cycles, GateKind::Operation)
    }

    /// A zero-input factory gate producing one output on its extern handle.
    pub fn factory(handle: Symbol, cycles: u32) -> Self {
        let name = format!("factory[{handle}]");
        Self::new(name, [handle], cycles, GateKind::Operation)
    }

    /// A reset releasing the extern instance bound to `handle`.
    pub fn reset(handle: Symbol) -> Self {
        let name = format!("reset[{handle}]");
        Self::new(name, [handle], 1, GateKind::Reset)
    }

    /// Whether the gate touches more than one operand.
    #[inline]
    pub fn is_non_local(&self) -> bool {
        self.operands.len() > 1
    }

    /// Whether the gate releases an extern binding on completion.
    #[inline]
    pub fn is_reset(&self) -> bool {
        self.kind == GateKind::Reset
    }

    /// The extern handle this gate uses, if any.
    pub fn extern_operand(&self) -> Option<&Symbol> {
        self.operands.iter().find(|s| s.is_extern())
    }

    /// Template of the extern factory this gate requires.
    pub fn extern_requirement(&self) -> Option<&str> {
        self.extern_operand().and_then(Symbol::template)
    }

    /// Whether this is a zero-input factory gate: an operation whose only
    /// operand is an extern handle.
    pub fn is_factory(&self) -> bool {
        self.kind == GateKind::Operation
            && self.operands.len() == 1
            && self.operands[0].is_extern()
    }
}
