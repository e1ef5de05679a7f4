//! Arvak Surface-Code Dependency IR
//!
//! This crate provides the input representation of the Arvak surface-code
//! backend: a dependency graph of fixed-cycle gates over operand symbols,
//! plus the extern (factory) templates gates may require.
//!
//! # Overview
//!
//! The backend does not care what a gate computes. It needs to know:
//! - which symbols the gate touches ([`Symbol`]),
//! - how many cycles it occupies them ([`Gate::cycles`]),
//! - whether it needs a routed path (more than one operand),
//! - whether it consumes output of an extern factory ([`ExternTemplate`]).
//!
//! [`DependencyGraph`] orders gates along their operand chains and exposes
//! layers, predicates, antecedents and slack.
//!
//! # Example: A Magic-State Injection
//!
//! ```rust
//! use arvak_surface_ir::{DependencyGraph, Gate, Symbol};
//!
//! let mut graph = DependencyGraph::new();
//! let q = Symbol::register("q0");
//! let t = Symbol::factory("T", 0);
//!
//! graph.add_gate(Gate::local("h", q.clone(), 1)).unwrap();
//! graph.add_gate(Gate::factory(t.clone(), 11)).unwrap();
//! let inject = graph.add_gate(Gate::non_local("inject", [q, t.clone()], 1)).unwrap();
//! graph.add_gate(Gate::reset(t)).unwrap();
//!
//! assert_eq!(graph.layer(inject).unwrap(), 1);
//! assert_eq!(graph.extern_templates(), &["T".to_string()]);
//! ```

pub mod error;
pub mod gate;
pub mod graph;
pub mod symbol;
pub mod template;

pub use error::{IrError, IrResult};
pub use gate::{Gate, GateKind};
pub use graph::{DependencyGraph, GateNode, NodeIndex};
pub use symbol::Symbol;
pub use template::ExternTemplate;
