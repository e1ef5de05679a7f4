//! Routing pass.

use arvak_surface_ir::DependencyGraph;

use crate::error::{CompileError, CompileResult};
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;
use crate::router::Router;

/// Routes every gate on the cell grid, ordered by the abstract schedule.
pub struct Routing;

impl Pass for Routing {
    fn name(&self) -> &'static str {
        "Routing"
    }

    fn kind(&self) -> PassKind {
        PassKind::Synthesis
    }

    fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()> {
        let config = properties
            .config
            .as_ref()
            .ok_or(CompileError::MissingConfig)?;
        let qcb = properties.qcb.as_ref().ok_or(CompileError::MissingQcb)?;
        let schedule = properties
            .schedule
            .as_ref()
            .ok_or(CompileError::MissingSchedule)?;
        let mapper = properties
            .mapper
            .as_mut()
            .ok_or(CompileError::MissingMapper)?;

        let routing = Router::new(graph, qcb, mapper, schedule, &config.router).run()?;
        properties.routing = Some(routing);
        Ok(())
    }
}
