//! Extern (factory) templates.

use serde::{Deserialize, Serialize};

/// An externally compiled resource block, such as a magic-state factory.
///
/// The template fixes the footprint on the fabric and the number of cycles
/// one production round takes. Gates refer to templates through
/// [`Symbol::Extern`](crate::Symbol::Extern) handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternTemplate {
    /// Template symbol, matched against extern handles.
    pub symbol: String,
    /// Footprint width in patches.
    pub width: u32,
    /// Footprint height in patches.
    pub height: u32,
    /// Cycles one production round takes.
    pub cycles: u32,
}

impl ExternTemplate {
    /// Create a new extern template.
    pub fn new(symbol: impl Into<String>, width: u32, height: u32, cycles: u32) -> Self {
        Self {
            symbol: symbol.into(),
            width,
            height,
            cycles,
        }
    }

    /// Number of patches covered by the template.
    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}
