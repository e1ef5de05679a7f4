//! Symbol placement pass.

use arvak_surface_ir::DependencyGraph;

use crate::error::CompileResult;
use crate::mapper::Mapper;
use crate::pass::{Pass, PassKind};
use crate::property::PropertySet;

/// Binds every register and I/O symbol of the graph to a cell.
///
/// Symbols already pinned in an existing mapper keep their cells.
pub struct Mapping;

impl Pass for Mapping {
    fn name(&self) -> &'static str {
        "Mapping"
    }

    fn kind(&self) -> PassKind {
        PassKind::Synthesis
    }

    fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()> {
        if properties.mapper.is_none() {
            let mapper = Mapper::new(properties.require_qcb()?);
            properties.mapper = Some(mapper);
        }
        if let Some(mapper) = properties.mapper.as_mut() {
            mapper.map_graph(graph)?;
        }
        Ok(())
    }
}
