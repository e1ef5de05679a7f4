//! Pass manager for orchestrating the backend stages.

use arvak_surface_ir::DependencyGraph;
use tracing::{debug, info, instrument};

use crate::config::CompilerConfig;
use crate::error::CompileResult;
use crate::pass::Pass;
use crate::passes::{Allocation, Mapping, Routing, Scheduling};
use crate::property::PropertySet;

/// Manages and executes a sequence of passes.
pub struct PassManager {
    /// The passes to execute, in order.
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Create a new empty pass manager.
    pub fn new() -> Self {
        Self { passes: vec![] }
    }

    /// Add a pass to the manager.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Run all passes on the given graph.
    #[instrument(skip(self, graph, properties))]
    pub fn run(&self, graph: &DependencyGraph, properties: &mut PropertySet) -> CompileResult<()> {
        info!(
            "Running pass manager with {} passes on graph with {} gates",
            self.passes.len(),
            graph.num_gates()
        );

        for pass in &self.passes {
            if pass.should_run(graph, properties) {
                debug!("Running pass: {}", pass.name());
                pass.run(graph, properties)?;
            } else {
                debug!("Skipping pass: {}", pass.name());
            }
        }

        info!(
            "Pass manager completed, cycles: {}",
            properties
                .routing
                .as_ref()
                .map(|r| r.cycles)
                .or_else(|| properties.schedule.as_ref().map(|s| s.cycles))
                .unwrap_or(0)
        );
        Ok(())
    }

    /// Get the number of passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the manager has no passes.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the standard allocation, mapping, scheduling and routing
/// pipeline.
pub struct PassManagerBuilder {
    properties: PropertySet,
    routing: bool,
}

impl PassManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            properties: PropertySet::new(),
            routing: true,
        }
    }

    /// Set the compiler configuration.
    #[must_use]
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.properties.config = Some(config);
        self
    }

    /// Set the initial properties.
    #[must_use]
    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }

    /// Stop after scheduling.
    #[must_use]
    pub fn without_routing(mut self) -> Self {
        self.routing = false;
        self
    }

    /// Build the pass manager and return it with the properties.
    pub fn build(self) -> (PassManager, PropertySet) {
        let mut pm = PassManager::new();
        pm.add_pass(Allocation);
        pm.add_pass(Mapping);
        pm.add_pass(Scheduling);
        if self.routing {
            pm.add_pass(Routing);
        }
        (pm, self.properties)
    }
}

impl Default for PassManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use crate::mapper::Mapper;
    use arvak_surface_ir::{Gate, Symbol};

    #[test]
    fn test_empty_pass_manager() {
        let pm = PassManager::new();
        assert!(pm.is_empty());
        assert_eq!(pm.len(), 0);
    }

    #[test]
    fn test_builder_stages() {
        let (pm, props) = PassManagerBuilder::new()
            .with_config(CompilerConfig::new(5, 9))
            .build();
        assert_eq!(pm.len(), 4);
        assert!(props.config.is_some());

        let (pm, _) = PassManagerBuilder::new().without_routing().build();
        assert_eq!(pm.len(), 3);
    }

    #[test]
    fn test_missing_config() {
        let (pm, mut props) = PassManagerBuilder::new().build();
        let mut g = DependencyGraph::new();
        g.add_gate(Gate::local("h", Symbol::register("q0"), 1)).unwrap();
        assert!(matches!(
            pm.run(&g, &mut props),
            Err(CompileError::MissingConfig)
        ));
    }

    #[test]
    fn test_pipeline_without_routing() {
        let (pm, mut props) = PassManagerBuilder::new()
            .with_config(CompilerConfig::new(5, 9).with_optimise(false))
            .without_routing()
            .build();
        let mut g = DependencyGraph::new();
        g.add_gate(Gate::non_local(
            "cx",
            [Symbol::register("q0"), Symbol::register("q1")],
            2,
        ))
        .unwrap();
        pm.run(&g, &mut props).unwrap();

        assert!(props.qcb.is_some());
        assert_eq!(props.mapper.as_ref().map(Mapper::num_mapped), Some(2));
        assert_eq!(props.schedule.as_ref().map(|s| s.cycles), Some(2));
        assert!(props.routing.is_none());
    }
}
