//! End-to-end entry point and its output.

use arvak_surface_ir::{DependencyGraph, NodeIndex};
use tracing::{info, instrument};

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::geometry::{Qcb, Segment};
use crate::manager::PassManagerBuilder;
use crate::router::{RouteRecord, RoutingResult};
use crate::scheduler::Schedule;

/// A graph compiled onto a fabric: layout, schedule and routes.
#[derive(Debug, Clone)]
pub struct CompiledCircuit {
    qcb: Qcb,
    schedule: Schedule,
    routing: RoutingResult,
}

impl CompiledCircuit {
    /// Cycles until the last routed gate completes.
    pub fn n_cycles(&self) -> u32 {
        self.routing.cycles
    }

    /// Height times width times cycles.
    pub fn space_time_volume(&self) -> u64 {
        u64::from(self.qcb.height()) * u64::from(self.qcb.width()) * u64::from(self.n_cycles())
    }

    pub fn qcb(&self) -> &Qcb {
        &self.qcb
    }

    /// Segments of the layout.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.qcb.segments().iter()
    }

    /// Abstract schedule the routes were ordered by.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn routing(&self) -> &RoutingResult {
        &self.routing
    }

    /// Gates admitted at cycle `t`.
    pub fn gates_at(&self, t: u32) -> &[NodeIndex] {
        self.routing
            .layers
            .get(t as usize)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Routes active during cycle `t`.
    pub fn routes_at(&self, t: u32) -> impl Iterator<Item = &RouteRecord> {
        self.routing.active_at(t)
    }
}

/// Run the full pipeline on `graph`.
#[instrument(skip(graph, config), fields(gates = graph.num_gates()))]
pub fn compile(graph: &DependencyGraph, config: &CompilerConfig) -> CompileResult<CompiledCircuit> {
    let (pm, mut properties) = PassManagerBuilder::new()
        .with_config(config.clone())
        .build();
    pm.run(graph, &mut properties)?;

    let qcb = properties.qcb.take().ok_or(CompileError::MissingQcb)?;
    let schedule = properties
        .schedule
        .take()
        .ok_or(CompileError::MissingSchedule)?;
    let routing = properties
        .routing
        .take()
        .ok_or(CompileError::MissingRouting)?;

    let compiled = CompiledCircuit {
        qcb,
        schedule,
        routing,
    };
    info!(
        "Compiled {} gates: {} cycles, volume {}",
        graph.num_gates(),
        compiled.n_cycles(),
        compiled.space_time_volume()
    );
    Ok(compiled)
}
