//! Error types for the surface-code backend.

use arvak_surface_ir::{IrError, Symbol};
use thiserror::Error;

use crate::geometry::SegmentId;

/// Invalid geometry requests.
///
/// These are contract violations by the caller, not capacity problems:
/// callers check fit before asking for a split.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GeometryError {
    /// Segment id not present in the set.
    #[error("Unknown segment {0}")]
    UnknownSegment(SegmentId),

    /// Segment is already allocated and cannot be split.
    #[error("Segment {0} is already allocated")]
    Allocated(SegmentId),

    /// Requested box does not lie inside the segment.
    #[error("Box {h}x{w} at ({y}, {x}) lies outside segment {segment}")]
    OutOfBounds {
        segment: SegmentId,
        y: u32,
        x: u32,
        h: u32,
        w: u32,
    },

    /// Pieces do not tile the segment exactly.
    #[error("Pieces do not tile segment {0}")]
    InvalidPartition(SegmentId),

    /// Edit pieces do not cover exactly the removed area.
    #[error("Edit does not preserve the removed area")]
    InvalidEdit,

    /// Partition or adjacency invariant broken.
    #[error("Segment invariant violated: {0}")]
    InvariantViolation(String),
}

/// Result type for geometry operations.
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Placement exhaustion and related allocator failures.
///
/// Fatal during the mandatory placement phases, treated as "no
/// improvement" by the optimiser.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocatorError {
    /// Grid cannot hold a routing row and a register row.
    #[error("Grid {height}x{width} is below the minimum size")]
    GridTooSmall { height: u32, width: u32 },

    /// I/O strip wider than the grid.
    #[error("No room for an I/O strip of width {width}")]
    IoExhausted { width: u32 },

    /// No free segment fits an extern block.
    #[error("No free segment fits extern '{template}' ({height}x{width} plus routing margin)")]
    ExternExhausted {
        template: String,
        height: u32,
        width: u32,
    },

    /// No register strip is wide enough to take another routing lane.
    #[error("No register strip can be split for another routing lane")]
    LaneExhausted,

    /// Not enough register or I/O cells for the graph's symbols.
    #[error("Layout holds {available} {kind} slots but {required} are required")]
    InsufficientSlots {
        kind: &'static str,
        required: usize,
        available: usize,
    },

    /// A routing component cannot reach the I/O routing row.
    #[error("Routing segment {0} cannot be connected to the I/O routing row")]
    Disconnected(SegmentId),

    /// Geometry contract violation while placing.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Result type for placement.
pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Errors that can occur during compilation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    /// Error from the IR crate.
    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    /// Invalid geometry request.
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Placement exhaustion.
    #[error("Allocation failed: {0}")]
    Allocator(#[from] AllocatorError),

    /// Graph requires an extern template that is not configured.
    #[error("Extern template '{0}' is required by the graph but not configured")]
    UnknownExtern(String),

    /// Symbol has no coordinate on the fabric.
    #[error("Symbol {0} has no coordinate on the fabric")]
    UnmappedSymbol(Symbol),

    /// Resource tree has no free slot of the requested kind.
    #[error("No free {0} slot left in the resource tree")]
    OutOfSlots(String),

    /// Repeated cycles without progress.
    #[error("Deadlock at cycle {cycle}: {waiting} gates cannot make progress")]
    Deadlock { cycle: u32, waiting: usize },

    /// No compiler configuration in the property set.
    #[error("Missing compiler configuration")]
    MissingConfig,

    /// Allocation has not run.
    #[error("Missing QCB layout; run allocation first")]
    MissingQcb,

    /// Mapping has not run.
    #[error("Missing mapper; run mapping first")]
    MissingMapper,

    /// Scheduling has not run.
    #[error("Missing schedule; run scheduling first")]
    MissingSchedule,

    /// Routing has not run.
    #[error("Missing routing result; run routing first")]
    MissingRouting,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON configuration error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;
