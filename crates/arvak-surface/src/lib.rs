//! Arvak Surface-Code Fabric Backend
//!
//! Compiles a [`DependencyGraph`](arvak_surface_ir::DependencyGraph) into a
//! concrete implementation on a rectangular surface-code fabric: where every
//! resource sits, when every gate runs, and which cells each multi-patch
//! operation occupies.
//!
//! # Architecture
//!
//! ```text
//! DependencyGraph + CompilerConfig
//!       │
//!       ▼
//! ┌─────────────┐
//! │ PassManager │ ◄── PropertySet (config, qcb, mapper, schedule, routing)
//! └─────────────┘
//!       │
//!       ├── Allocation   geometry engine + placement allocator (+ optimiser)
//!       ├── Mapping      resource tree, symbol → cell
//!       ├── Scheduling   discrete-event DAG scheduler
//!       └── Routing      A* over the cell grid, locks, teleportation
//!       │
//!       ▼
//! CompiledCircuit (layout, schedule, routes)
//! ```
//!
//! # Example
//!
//! ```rust
//! use arvak_surface::{compile, CompilerConfig};
//! use arvak_surface_ir::{DependencyGraph, Gate, Symbol};
//!
//! let mut graph = DependencyGraph::new();
//! let (a, b) = (Symbol::register("a"), Symbol::register("b"));
//! graph.add_gate(Gate::local("h", a.clone(), 1)).unwrap();
//! graph.add_gate(Gate::non_local("cx", [a, b], 2)).unwrap();
//!
//! let compiled = compile(&graph, &CompilerConfig::new(5, 9)).unwrap();
//! assert!(compiled.n_cycles() >= 3);
//! assert_eq!(compiled.space_time_volume(), 45 * u64::from(compiled.n_cycles()));
//! ```
//!
//! # Custom Passes
//!
//! Stages are ordinary [`Pass`] implementations; extra analysis can be
//! added to a [`PassManager`] next to the built-in ones:
//!
//! ```rust
//! use arvak_surface::{CompileResult, Pass, PassKind, PropertySet};
//! use arvak_surface_ir::DependencyGraph;
//!
//! struct CountChannels;
//!
//! impl Pass for CountChannels {
//!     fn name(&self) -> &str { "count_channels" }
//!     fn kind(&self) -> PassKind { PassKind::Analysis }
//!
//!     fn run(&self, _graph: &DependencyGraph, props: &mut PropertySet) -> CompileResult<()> {
//!         let channels = props.require_qcb()?.n_channels();
//!         props.insert(channels);
//!         Ok(())
//!     }
//! }
//! ```

pub mod allocator;
pub mod compiled;
pub mod config;
pub mod error;
pub mod geometry;
pub mod manager;
pub mod mapper;
pub mod pass;
pub mod property;
pub mod router;
pub mod scheduler;
pub mod tree;

// Built-in passes
pub mod passes;

pub use allocator::{Allocator, Placement, Plan};
pub use compiled::{CompiledCircuit, compile};
pub use config::{AllocatorConfig, CompilerConfig, RouterConfig, TeleportConfig, TeleportPolicy};
pub use error::{
    AllocatorError, AllocatorResult, CompileError, CompileResult, GeometryError, GeometryResult,
};
pub use geometry::{
    Coord, ExternHandle, ExternInstance, Qcb, Rect, Segment, SegmentId, SegmentSet, SegmentState,
};
pub use manager::{PassManager, PassManagerBuilder};
pub use mapper::{ExternTable, Mapper, ReservationToken};
pub use pass::{Pass, PassKind};
pub use property::PropertySet;
pub use router::{CellLock, RouteRecord, Router, RoutingResult, Teleport};
pub use scheduler::{Schedule, Scheduler};
pub use tree::{ResourceTree, SlotKind};
