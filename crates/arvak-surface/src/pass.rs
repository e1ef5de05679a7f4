//! Pass trait for backend stages.

use arvak_surface_ir::DependencyGraph;

use crate::error::CompileResult;
use crate::property::PropertySet;

/// The kind of backend pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Derives facts about the graph without producing a stage output.
    Analysis,
    /// Produces a stage output in the `PropertySet`.
    Synthesis,
}

/// One stage of the backend pipeline.
///
/// A pass reads the graph and the outputs of earlier stages from the
/// `PropertySet`, and stores its own output there. The graph itself is
/// never modified.
pub trait Pass: Send + Sync {
    /// Get the name of this pass.
    fn name(&self) -> &str;

    /// Get the kind of this pass.
    fn kind(&self) -> PassKind;

    /// Run the pass.
    fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()>;

    /// Check if this pass should run based on current state.
    fn should_run(&self, _graph: &DependencyGraph, _properties: &PropertySet) -> bool {
        true
    }
}
