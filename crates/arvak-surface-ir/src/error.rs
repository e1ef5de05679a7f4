//! Error types for the IR crate.

use crate::symbol::Symbol;
use thiserror::Error;

/// Errors that can occur while building a dependency graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IrError {
    /// Gate has no operands.
    #[error("Gate '{gate_name}' has no operands")]
    EmptyOperands {
        /// Name of the gate.
        gate_name: String,
    },

    /// The same symbol appears twice in one gate.
    #[error("Duplicate operand {symbol} in gate '{gate_name}'")]
    DuplicateOperand {
        /// The duplicated symbol.
        symbol: Symbol,
        /// Name of the gate.
        gate_name: String,
    },

    /// Every gate occupies at least one cycle.
    #[error("Gate '{0}' must take at least one cycle")]
    ZeroCycles(String),

    /// Reset gates only act on a single extern symbol.
    #[error("Reset must target exactly one extern symbol, got {0:?}")]
    InvalidReset(Vec<Symbol>),

    /// Invalid node index.
    #[error("Invalid node index")]
    InvalidNode,
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;
