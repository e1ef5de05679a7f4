//! Operand symbols.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An operand of a gate.
///
/// Register and I/O symbols name logical qubits that live in register or
/// I/O patches. Extern symbols name one logical use of a factory template;
/// the backend binds them to a physical extern instance at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Symbol {
    /// A data qubit stored in a register patch.
    Register(String),
    /// A qubit stored on the I/O strip.
    Io(String),
    /// A logical handle on an extern resource.
    Extern {
        /// Symbol of the extern template that can satisfy this handle.
        template: String,
        /// Distinguishes concurrent uses of the same template.
        id: u32,
    },
}

impl Symbol {
    /// Create a register symbol.
    pub fn register(name: impl Into<String>) -> Self {
        Symbol::Register(name.into())
    }

    /// Create an I/O symbol.
    pub fn io(name: impl Into<String>) -> Self {
        Symbol::Io(name.into())
    }

    /// Create an extern handle for the given template.
    pub fn factory(template: impl Into<String>, id: u32) -> Self {
        Symbol::Extern {
            template: template.into(),
            id,
        }
    }

    /// Check if this symbol names an extern resource.
    #[inline]
    pub fn is_extern(&self) -> bool {
        matches!(self, Symbol::Extern { .. })
    }

    /// Check if this symbol lives on the I/O strip.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Symbol::Io(_))
    }

    /// Template required by an extern symbol.
    pub fn template(&self) -> Option<&str> {
        match self {
            Symbol::Extern { template, .. } => Some(template),
            _ => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Register(name) => write!(f, "{name}"),
            Symbol::Io(name) => write!(f, "io:{name}"),
            Symbol::Extern { template, id } => write!(f, "{template}#{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_kinds() {
        let q = Symbol::register("q0");
        let t = Symbol::factory("T", 3);

        assert!(!q.is_extern());
        assert!(t.is_extern());
        assert_eq!(t.template(), Some("T"));
        assert_eq!(q.template(), None);
        assert!(Symbol::io("in").is_io());
    }

    #[test]
    fn test_symbol_display() {
        assert_eq!(Symbol::register("q0").to_string(), "q0");
        assert_eq!(Symbol::io("a").to_string(), "io:a");
        assert_eq!(Symbol::factory("T", 2).to_string(), "T#2");
    }
}
