//! Abstract scheduling pass.

use arvak_surface_ir::DependencyGraph;

use crate::error::{CompileError, CompileResult};
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;
use crate::scheduler::Scheduler;

/// Schedules the graph against the layout's channel budget, binding
/// factories through the mapper's extern table.
pub struct Scheduling;

impl Pass for Scheduling {
    fn name(&self) -> &'static str {
        "Scheduling"
    }

    fn kind(&self) -> PassKind {
        PassKind::Analysis
    }

    fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()> {
        let qcb = properties.require_qcb()?;
        let externs = properties
            .mapper
            .as_ref()
            .ok_or(CompileError::MissingMapper)?
            .externs()
            .clone();
        let schedule = Scheduler::new(graph, qcb.n_channels())
            .with_externs(externs)
            .run()?;
        properties.schedule = Some(schedule);
        Ok(())
    }
}
