//! `PropertySet`: the shared context passed through backend passes.
//!
//! Each stage stores its committed output here and later stages read it.
//! Passes may also exchange arbitrary typed data through the custom map.
//!
//! ```
//! use arvak_surface::{CompilerConfig, PropertySet};
//!
//! #[derive(Debug, PartialEq)]
//! struct Attempts(u32);
//!
//! let mut props = PropertySet::new().with_config(CompilerConfig::new(5, 9));
//! props.insert(Attempts(3));
//!
//! assert!(props.config.is_some());
//! assert_eq!(props.get::<Attempts>(), Some(&Attempts(3)));
//! ```

use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

use crate::allocator::Plan;
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};
use crate::geometry::Qcb;
use crate::mapper::Mapper;
use crate::router::RoutingResult;
use crate::scheduler::Schedule;

/// Stage outputs and custom properties.
#[derive(Debug, Default)]
pub struct PropertySet {
    /// Grid size, extern templates and stage settings.
    pub config: Option<CompilerConfig>,

    /// Plan the layout was placed from. Set by allocation.
    pub plan: Option<Plan>,

    /// Layout. Set by allocation.
    pub qcb: Option<Qcb>,

    /// Symbol placement and extern occupancy. Set by mapping, updated by
    /// routing.
    pub mapper: Option<Mapper>,

    /// Abstract schedule. Set by scheduling.
    pub schedule: Option<Schedule>,

    /// Concrete routes. Set by routing.
    pub routing: Option<RoutingResult>,

    /// Custom properties storage (type-erased).
    custom: FxHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl PropertySet {
    /// Create a new empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compiler configuration.
    #[must_use]
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Configuration, or [`CompileError::MissingConfig`].
    pub fn require_config(&self) -> CompileResult<&CompilerConfig> {
        self.config.as_ref().ok_or(CompileError::MissingConfig)
    }

    /// Layout, or [`CompileError::MissingQcb`].
    pub fn require_qcb(&self) -> CompileResult<&Qcb> {
        self.qcb.as_ref().ok_or(CompileError::MissingQcb)
    }

    /// Schedule, or [`CompileError::MissingSchedule`].
    pub fn require_schedule(&self) -> CompileResult<&Schedule> {
        self.schedule.as_ref().ok_or(CompileError::MissingSchedule)
    }

    /// Insert a custom property.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.custom.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a custom property.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.custom
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Get a mutable custom property.
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.custom
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    /// Remove a custom property.
    pub fn remove<T: Any>(&mut self) -> Option<T> {
        self.custom
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stage_outputs() {
        let props = PropertySet::new();
        assert!(matches!(props.require_config(), Err(CompileError::MissingConfig)));
        assert!(matches!(props.require_qcb(), Err(CompileError::MissingQcb)));
        assert!(matches!(
            props.require_schedule(),
            Err(CompileError::MissingSchedule)
        ));
    }

    #[test]
    #[allow(clippy::items_after_statements)]
    fn test_property_set_custom() {
        let mut props = PropertySet::new();

        #[derive(Debug, PartialEq)]
        struct Retries(u32);

        props.insert(Retries(1));
        if let Some(r) = props.get_mut::<Retries>() {
            r.0 += 1;
        }
        assert_eq!(props.get::<Retries>(), Some(&Retries(2)));

        assert_eq!(props.remove::<Retries>(), Some(Retries(2)));
        assert_eq!(props.get::<Retries>(), None);
    }
}
