//! Compiler configuration.
//!
//! Configuration can be built in code, or loaded from YAML or JSON. Every
//! section except the grid size has defaults, so a minimal file is:
//!
//! ```yaml
//! height: 6
//! width: 10
//! externs:
//!   - symbol: T
//!     width: 2
//!     height: 2
//!     cycles: 11
//! ```

use std::path::Path;

use arvak_surface_ir::ExternTemplate;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Complete compiler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Grid height in patches.
    pub height: u32,

    /// Grid width in patches.
    pub width: u32,

    /// Extern templates available for placement.
    #[serde(default)]
    pub externs: Vec<ExternTemplate>,

    /// Placement settings.
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Routing settings.
    #[serde(default)]
    pub router: RouterConfig,
}

/// Placement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Run the hill-climbing optimiser after the mandatory phases.
    #[serde(default = "default_true")]
    pub optimise: bool,

    /// Maximum number of accepted optimiser moves.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

/// Routing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub teleport: TeleportConfig,

    /// Consecutive cycles without progress and without active gates after
    /// which routing reports a deadlock.
    #[serde(default = "default_deadlock_threshold")]
    pub deadlock_threshold: u32,
}

/// When a teleported route holds its switch cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeleportPolicy {
    /// First cycle of the gate.
    #[default]
    Asap,
    /// Last cycle of the gate.
    Alap,
}

/// Teleportation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeleportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub policy: TeleportPolicy,

    /// Routes with fewer routing cells are never teleported.
    #[serde(default = "default_min_route_length")]
    pub min_route_length: usize,

    /// Routing cells with at least this many routing neighbours, where a
    /// corridor branches, act as switches.
    #[serde(default = "default_min_switch_neighbours")]
    pub min_switch_neighbours: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_rounds() -> usize {
    8
}

fn default_deadlock_threshold() -> u32 {
    8
}

fn default_min_route_length() -> usize {
    6
}

fn default_min_switch_neighbours() -> usize {
    3
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            optimise: true,
            max_rounds: default_max_rounds(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            teleport: TeleportConfig::default(),
            deadlock_threshold: default_deadlock_threshold(),
        }
    }
}

impl Default for TeleportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: TeleportPolicy::Asap,
            min_route_length: default_min_route_length(),
            min_switch_neighbours: default_min_switch_neighbours(),
        }
    }
}

impl CompilerConfig {
    /// Configuration for a `height x width` grid with default settings.
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            externs: Vec::new(),
            allocator: AllocatorConfig::default(),
            router: RouterConfig::default(),
        }
    }

    /// Add an extern template.
    #[must_use]
    pub fn with_extern(mut self, template: ExternTemplate) -> Self {
        self.externs.push(template);
        self
    }

    /// Enable or disable the placement optimiser.
    #[must_use]
    pub fn with_optimise(mut self, optimise: bool) -> Self {
        self.allocator.optimise = optimise;
        self
    }

    /// Enable or disable teleportation.
    #[must_use]
    pub fn with_teleport(mut self, enabled: bool) -> Self {
        self.router.teleport.enabled = enabled;
        self
    }

    /// Look up an extern template by symbol.
    pub fn extern_template(&self, symbol: &str) -> Option<&ExternTemplate> {
        self.externs.iter().find(|t| t.symbol == symbol)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(contents: &str) -> CompileResult<Self> {
        let config: Self = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(contents: &str) -> CompileResult<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; `.json` files are read as JSON, anything
    /// else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CompileResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Check the configuration for values no layout can satisfy.
    pub fn validate(&self) -> CompileResult<()> {
        if self.height == 0 || self.width == 0 {
            return Err(CompileError::InvalidConfiguration(format!(
                "Grid must be non-empty, got {}x{}",
                self.height, self.width
            )));
        }

        for (i, t) in self.externs.iter().enumerate() {
            if t.symbol.is_empty() {
                return Err(CompileError::InvalidConfiguration(
                    "Extern template with empty symbol".into(),
                ));
            }
            if t.width == 0 || t.height == 0 || t.cycles == 0 {
                return Err(CompileError::InvalidConfiguration(format!(
                    "Extern template '{}' needs non-zero size and cycles",
                    t.symbol
                )));
            }
            if self.externs[..i].iter().any(|o| o.symbol == t.symbol) {
                return Err(CompileError::InvalidConfiguration(format!(
                    "Duplicate extern template '{}'",
                    t.symbol
                )));
            }
        }

        if self.router.deadlock_threshold == 0 {
            return Err(CompileError::InvalidConfiguration(
                "Deadlock threshold must be at least 1".into(),
            ));
        }

        if !(3..=4).contains(&self.router.teleport.min_switch_neighbours) {
            return Err(CompileError::InvalidConfiguration(format!(
                "Switch cells need 3 or 4 routing neighbours, got {}",
                self.router.teleport.min_switch_neighbours
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::new(5, 9);
        assert!(config.allocator.optimise);
        assert_eq!(config.allocator.max_rounds, 8);
        assert!(config.router.teleport.enabled);
        assert_eq!(config.router.teleport.policy, TeleportPolicy::Asap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r"
height: 6
width: 10
externs:
  - symbol: T
    width: 2
    height: 2
    cycles: 11
router:
  teleport:
    policy: alap
    min_route_length: 4
";
        let config = CompilerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.height, 6);
        assert_eq!(config.extern_template("T").unwrap().cycles, 11);
        assert_eq!(config.router.teleport.policy, TeleportPolicy::Alap);
        assert_eq!(config.router.teleport.min_route_length, 4);
        assert_eq!(config.router.teleport.min_switch_neighbours, 3);
        assert_eq!(config.router.deadlock_threshold, 8);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"height": 3, "width": 4, "allocator": {"optimise": false}}"#;
        let config = CompilerConfig::from_json_str(json).unwrap();
        assert!(!config.allocator.optimise);
        assert_eq!(config.allocator.max_rounds, 8);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(CompilerConfig::new(0, 4).validate().is_err());

        let config = CompilerConfig::new(4, 4)
            .with_extern(ExternTemplate::new("T", 2, 2, 5))
            .with_extern(ExternTemplate::new("T", 1, 1, 5));
        assert!(matches!(
            config.validate(),
            Err(CompileError::InvalidConfiguration(_))
        ));

        let config = CompilerConfig::new(4, 4).with_extern(ExternTemplate::new("T", 0, 2, 5));
        assert!(config.validate().is_err());

        let mut config = CompilerConfig::new(4, 4);
        config.router.teleport.min_switch_neighbours = 2;
        assert!(config.validate().is_err());
    }
}
