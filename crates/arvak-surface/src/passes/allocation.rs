//! Layout pass.

use arvak_surface_ir::DependencyGraph;
use tracing::info;

use crate::allocator::{Allocator, Plan};
use crate::error::CompileResult;
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;

/// Places I/O, externs, routing and registers on the configured grid.
///
/// Skipped when the property set already carries a layout.
pub struct Allocation;

impl Pass for Allocation {
    fn name(&self) -> &'static str {
        "Allocation"
    }

    fn kind(&self) -> PassKind {
        PassKind::Synthesis
    }

    fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()> {
        let config = properties.require_config()?;
        config.validate()?;

        let plan = Plan::initial(graph, config)?;
        let allocator = Allocator::new(graph, config.height, config.width);
        let (plan, qcb) = if config.allocator.optimise {
            let placement = allocator.optimise(plan, config.allocator.max_rounds)?;
            (placement.plan, placement.qcb)
        } else {
            let qcb = allocator.place(&plan)?;
            (plan, qcb)
        };

        info!(
            "Placed {}x{} grid: {} channels, {} extern instances",
            qcb.height(),
            qcb.width(),
            qcb.n_channels(),
            qcb.externs().len()
        );
        properties.plan = Some(plan);
        properties.qcb = Some(qcb);
        Ok(())
    }

    fn should_run(&self, _graph: &DependencyGraph, properties: &PropertySet) -> bool {
        properties.qcb.is_none()
    }
}
